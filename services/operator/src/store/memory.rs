//! In-memory object store for testing and development.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kiln_api::{Environment, EnvironmentConfig, EnvironmentStatus};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ObjectKey, ObjectStore, StoreError, StoreResult};

/// Object kinds held by the memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Environment,
    EnvironmentConfig,
    Secret,
    Job,
    Deployment,
    Service,
    Ingress,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A mutating call received by the memory store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Create(Kind, ObjectKey),
    Replace(Kind, ObjectKey),
    Delete(Kind, ObjectKey),
    UpdateStatus(ObjectKey),
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(Kind, ObjectKey), serde_json::Value>,
    calls: Vec<StoreCall>,
    failing_writes: BTreeSet<Kind>,
    conflicting_replaces: BTreeSet<Kind>,
}

/// In-memory [`ObjectStore`].
///
/// Objects are kept in their serialized form so every read hands out a fresh
/// copy, the way an API server would.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an object without recording a call.
    pub async fn put<K: Resource + Serialize>(&self, kind: Kind, object: &K) -> StoreResult<()> {
        let key = ObjectKey::from_meta(object.meta())?;
        let value = serde_json::to_value(object)?;
        self.state.lock().await.objects.insert((kind, key), value);
        Ok(())
    }

    /// Remove an object without recording a call.
    pub async fn remove(&self, kind: Kind, key: &ObjectKey) {
        self.state.lock().await.objects.remove(&(kind, key.clone()));
    }

    /// Make every create/replace of `kind` fail with an API error.
    pub async fn fail_writes(&self, kind: Kind) {
        self.state.lock().await.failing_writes.insert(kind);
    }

    /// Make the next replace of `kind` fail with a conflict, as if the object
    /// had been modified since it was read.
    pub async fn conflict_next_replace(&self, kind: Kind) {
        self.state.lock().await.conflicting_replaces.insert(kind);
    }

    /// Mutating calls received so far.
    pub async fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    async fn read<K: DeserializeOwned>(&self, kind: Kind, key: &ObjectKey) -> StoreResult<Option<K>> {
        let state = self.state.lock().await;
        match state.objects.get(&(kind, key.clone())) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    async fn write<K>(&self, kind: Kind, object: &K, replace: bool) -> StoreResult<K>
    where
        K: Resource + Serialize + Clone,
    {
        let key = ObjectKey::from_meta(object.meta())?;
        let mut state = self.state.lock().await;

        let call = if replace {
            StoreCall::Replace(kind, key.clone())
        } else {
            StoreCall::Create(kind, key.clone())
        };
        state.calls.push(call);

        if state.failing_writes.contains(&kind) {
            return Err(StoreError::Api(format!("injected write failure for {kind} {key}")));
        }
        if replace && state.conflicting_replaces.remove(&kind) {
            return Err(StoreError::Conflict(format!(
                "{kind} {key} has been modified"
            )));
        }

        let exists = state.objects.contains_key(&(kind, key.clone()));
        if replace && !exists {
            return Err(StoreError::NotFound(format!("{kind} {key}")));
        }
        if !replace && exists {
            return Err(StoreError::AlreadyExists(format!("{kind} {key}")));
        }

        debug!(kind = %kind, key = %key, replace, "[MEMORY] Writing object");
        state
            .objects
            .insert((kind, key), serde_json::to_value(object)?);
        Ok(object.clone())
    }

    async fn delete(&self, kind: Kind, key: &ObjectKey) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::Delete(kind, key.clone()));

        match state.objects.remove(&(kind, key.clone())) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("{kind} {key}"))),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_environment(&self, key: &ObjectKey) -> StoreResult<Option<Environment>> {
        self.read(Kind::Environment, key).await
    }

    async fn get_environment_config(
        &self,
        key: &ObjectKey,
    ) -> StoreResult<Option<EnvironmentConfig>> {
        self.read(Kind::EnvironmentConfig, key).await
    }

    async fn get_secret(&self, key: &ObjectKey) -> StoreResult<Option<Secret>> {
        self.read(Kind::Secret, key).await
    }

    async fn get_job(&self, key: &ObjectKey) -> StoreResult<Option<Job>> {
        self.read(Kind::Job, key).await
    }

    async fn get_deployment(&self, key: &ObjectKey) -> StoreResult<Option<Deployment>> {
        self.read(Kind::Deployment, key).await
    }

    async fn get_service(&self, key: &ObjectKey) -> StoreResult<Option<Service>> {
        self.read(Kind::Service, key).await
    }

    async fn get_ingress(&self, key: &ObjectKey) -> StoreResult<Option<Ingress>> {
        self.read(Kind::Ingress, key).await
    }

    async fn update_environment_status(
        &self,
        key: &ObjectKey,
        status: &EnvironmentStatus,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::UpdateStatus(key.clone()));

        let Some(value) = state.objects.get_mut(&(Kind::Environment, key.clone())) else {
            return Err(StoreError::NotFound(format!("Environment {key}")));
        };
        let mut environment: Environment = serde_json::from_value(value.clone())?;
        environment.status = Some(status.clone());
        *value = serde_json::to_value(&environment)?;
        Ok(())
    }

    async fn create_job(&self, job: &Job) -> StoreResult<Job> {
        self.write(Kind::Job, job, false).await
    }

    async fn delete_job(&self, key: &ObjectKey) -> StoreResult<()> {
        self.delete(Kind::Job, key).await
    }

    async fn create_deployment(&self, deployment: &Deployment) -> StoreResult<Deployment> {
        self.write(Kind::Deployment, deployment, false).await
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> StoreResult<Deployment> {
        self.write(Kind::Deployment, deployment, true).await
    }

    async fn create_service(&self, service: &Service) -> StoreResult<Service> {
        self.write(Kind::Service, service, false).await
    }

    async fn replace_service(&self, service: &Service) -> StoreResult<Service> {
        self.write(Kind::Service, service, true).await
    }

    async fn delete_service(&self, key: &ObjectKey) -> StoreResult<()> {
        self.delete(Kind::Service, key).await
    }

    async fn create_ingress(&self, ingress: &Ingress) -> StoreResult<Ingress> {
        self.write(Kind::Ingress, ingress, false).await
    }

    async fn replace_ingress(&self, ingress: &Ingress) -> StoreResult<Ingress> {
        self.write(Kind::Ingress, ingress, true).await
    }

    async fn delete_ingress(&self, key: &ObjectKey) -> StoreResult<()> {
        self.delete(Kind::Ingress, key).await
    }
}
