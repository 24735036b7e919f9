//! Cluster object store interface.
//!
//! The store abstracts typed object reads and writes against the cluster:
//! - Reads return `None` when the object does not exist
//! - Writes report "not found" distinctly from other failures
//!
//! [`KubeStore`] talks to the API server; [`MemoryStore`] is an in-memory
//! implementation for tests and local development.

mod cluster;
mod memory;

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kiln_api::{Environment, EnvironmentConfig, EnvironmentStatus};
use thiserror::Error;

pub use self::cluster::KubeStore;
pub use self::memory::{Kind, MemoryStore, StoreCall};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from cluster object operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Concurrent modification.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("api error: {0}")]
    Api(String),
}

impl StoreError {
    /// Returns true if the object did not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Namespaced identity of a cluster object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an object from its metadata.
    pub fn from_meta(meta: &ObjectMeta) -> StoreResult<Self> {
        match (&meta.namespace, &meta.name) {
            (Some(namespace), Some(name)) => Ok(Self::new(namespace, name)),
            _ => Err(StoreError::Invalid(
                "object metadata is missing namespace or name".to_string(),
            )),
        }
    }

    /// Key of a sibling object in the same namespace.
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self::new(self.namespace.clone(), name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Typed access to the cluster objects the operator reads and writes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_environment(&self, key: &ObjectKey) -> StoreResult<Option<Environment>>;

    async fn get_environment_config(
        &self,
        key: &ObjectKey,
    ) -> StoreResult<Option<EnvironmentConfig>>;

    async fn get_secret(&self, key: &ObjectKey) -> StoreResult<Option<Secret>>;

    async fn get_job(&self, key: &ObjectKey) -> StoreResult<Option<Job>>;

    async fn get_deployment(&self, key: &ObjectKey) -> StoreResult<Option<Deployment>>;

    async fn get_service(&self, key: &ObjectKey) -> StoreResult<Option<Service>>;

    async fn get_ingress(&self, key: &ObjectKey) -> StoreResult<Option<Ingress>>;

    /// Persist the status sub-resource of an environment.
    async fn update_environment_status(
        &self,
        key: &ObjectKey,
        status: &EnvironmentStatus,
    ) -> StoreResult<()>;

    async fn create_job(&self, job: &Job) -> StoreResult<Job>;

    /// Delete a job along with its pods.
    async fn delete_job(&self, key: &ObjectKey) -> StoreResult<()>;

    async fn create_deployment(&self, deployment: &Deployment) -> StoreResult<Deployment>;

    async fn replace_deployment(&self, deployment: &Deployment) -> StoreResult<Deployment>;

    async fn create_service(&self, service: &Service) -> StoreResult<Service>;

    async fn replace_service(&self, service: &Service) -> StoreResult<Service>;

    async fn delete_service(&self, key: &ObjectKey) -> StoreResult<()>;

    async fn create_ingress(&self, ingress: &Ingress) -> StoreResult<Ingress>;

    async fn replace_ingress(&self, ingress: &Ingress) -> StoreResult<Ingress>;

    async fn delete_ingress(&self, key: &ObjectKey) -> StoreResult<()>;
}
