//! Object store backed by the Kubernetes API server.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kiln_api::{Environment, EnvironmentConfig, EnvironmentStatus};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{ObjectKey, ObjectStore, StoreError, StoreResult};

/// Kubernetes-backed [`ObjectStore`].
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_opt<K>(&self, key: &ObjectKey) -> StoreResult<Option<K>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        Ok(self.api::<K>(&key.namespace).get_opt(&key.name).await?)
    }

    async fn create<K>(&self, object: &K) -> StoreResult<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug,
    {
        let key = ObjectKey::from_meta(object.meta())?;
        debug!(kind = %K::kind(&()), key = %key, "Creating object");
        Ok(self
            .api::<K>(&key.namespace)
            .create(&PostParams::default(), object)
            .await?)
    }

    async fn replace<K>(&self, object: &K) -> StoreResult<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug,
    {
        let key = ObjectKey::from_meta(object.meta())?;
        debug!(kind = %K::kind(&()), key = %key, "Replacing object");
        Ok(self
            .api::<K>(&key.namespace)
            .replace(&key.name, &PostParams::default(), object)
            .await?)
    }

    async fn delete<K>(&self, key: &ObjectKey) -> StoreResult<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        debug!(kind = %K::kind(&()), key = %key, "Deleting object");
        self.api::<K>(&key.namespace)
            .delete(&key.name, &DeleteParams::background())
            .await?;
        Ok(())
    }
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => match response.code {
                404 => StoreError::NotFound(response.message),
                409 if response.reason == "AlreadyExists" => {
                    StoreError::AlreadyExists(response.message)
                }
                409 => StoreError::Conflict(response.message),
                _ => StoreError::Api(response.message),
            },
            kube::Error::SerdeError(e) => StoreError::Serialization(e),
            other => StoreError::Api(other.to_string()),
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_environment(&self, key: &ObjectKey) -> StoreResult<Option<Environment>> {
        self.get_opt(key).await
    }

    async fn get_environment_config(
        &self,
        key: &ObjectKey,
    ) -> StoreResult<Option<EnvironmentConfig>> {
        self.get_opt(key).await
    }

    async fn get_secret(&self, key: &ObjectKey) -> StoreResult<Option<Secret>> {
        self.get_opt(key).await
    }

    async fn get_job(&self, key: &ObjectKey) -> StoreResult<Option<Job>> {
        self.get_opt(key).await
    }

    async fn get_deployment(&self, key: &ObjectKey) -> StoreResult<Option<Deployment>> {
        self.get_opt(key).await
    }

    async fn get_service(&self, key: &ObjectKey) -> StoreResult<Option<Service>> {
        self.get_opt(key).await
    }

    async fn get_ingress(&self, key: &ObjectKey) -> StoreResult<Option<Ingress>> {
        self.get_opt(key).await
    }

    async fn update_environment_status(
        &self,
        key: &ObjectKey,
        status: &EnvironmentStatus,
    ) -> StoreResult<()> {
        let patch = serde_json::json!({ "status": status });
        self.api::<Environment>(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn create_job(&self, job: &Job) -> StoreResult<Job> {
        self.create(job).await
    }

    async fn delete_job(&self, key: &ObjectKey) -> StoreResult<()> {
        self.delete::<Job>(key).await
    }

    async fn create_deployment(&self, deployment: &Deployment) -> StoreResult<Deployment> {
        self.create(deployment).await
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> StoreResult<Deployment> {
        self.replace(deployment).await
    }

    async fn create_service(&self, service: &Service) -> StoreResult<Service> {
        self.create(service).await
    }

    async fn replace_service(&self, service: &Service) -> StoreResult<Service> {
        self.replace(service).await
    }

    async fn delete_service(&self, key: &ObjectKey) -> StoreResult<()> {
        self.delete::<Service>(key).await
    }

    async fn create_ingress(&self, ingress: &Ingress) -> StoreResult<Ingress> {
        self.create(ingress).await
    }

    async fn replace_ingress(&self, ingress: &Ingress) -> StoreResult<Ingress> {
        self.replace(ingress).await
    }

    async fn delete_ingress(&self, key: &ObjectKey) -> StoreResult<()> {
        self.delete::<Ingress>(key).await
    }
}
