//! kiln operator library.
//!
//! The operator turns `Environment` objects into running workloads. Every
//! environment moves through the same pipeline: build the image from the
//! uploaded source archive, verify it landed in the registry, deploy it, and
//! wait for all replicas to become available.
//!
//! - [`collection`]: per-pass observed and desired state
//! - [`stages`]: the pipeline state machine
//! - [`handler`]: one reconciliation pass
//! - [`controller`]: the per-environment scheduler
//! - [`status_api`]: live status for watchers

pub mod collection;
pub mod config;
pub mod controller;
pub mod error;
pub mod handler;
pub mod registry;
pub mod stages;
pub mod status_api;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
