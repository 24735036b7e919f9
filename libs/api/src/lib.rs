//! kiln resource definitions.
//!
//! This crate defines the persisted state the operator reconciles:
//!
//! - [`Environment`]: one deployable development workload and its pipeline status
//! - [`EnvironmentConfig`]: operator-scoped storage and registry settings
//! - [`Stage`]: the closed set of build-deploy pipeline stages
//!
//! Specs are defaulted with [`Defaults`] immediately after they are read, so
//! every downstream consumer sees fully populated values.

mod defaults;
mod environment;
mod environment_config;
pub mod naming;
mod stage;

pub use defaults::Defaults;
pub use environment::{
    BuildSpec, Environment, EnvironmentSpec, EnvironmentStatus, IngressSettings, ServiceSettings,
};
pub use environment_config::{
    EnvironmentConfig, EnvironmentConfigSpec, RegistrySettings, StorageSettings,
};
pub use stage::Stage;
