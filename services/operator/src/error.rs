//! Operator error types.

use thiserror::Error;

use crate::registry::RegistryError;
use crate::store::StoreError;

/// Result type for reconciliation operations.
pub type OperatorResult<T> = Result<T, OperatorError>;

/// Errors that can occur while reconciling an environment.
#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("environment config {namespace}/{name} not found")]
    MissingConfig { namespace: String, name: String },

    #[error("storage credentials secret {namespace}/{name} not found")]
    MissingCredentials { namespace: String, name: String },

    #[error("{0}")]
    Stage(String),
}

impl OperatorError {
    pub(crate) fn stage(message: impl Into<String>) -> Self {
        Self::Stage(message.into())
    }
}
