//! Desired-state builder.
//!
//! Computes the exact target shape of every object an environment owns from
//! its observed (and defaulted) spec. Builders are pure: they read only the
//! [`Observed`] value and never touch the cluster.

mod deployment;
mod job;
mod metadata;
mod network;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;

pub use self::job::same_job_shape;

use super::Observed;

/// Target state for one environment.
#[derive(Debug, Clone)]
pub struct Desired {
    pub job: Job,
    pub deployment: Deployment,

    /// `None` when the service toggle is off.
    pub service: Option<Service>,

    /// `None` unless both the service and ingress toggles are on.
    pub ingress: Option<Ingress>,
}

impl Desired {
    pub fn build(observed: &Observed) -> Self {
        Self {
            job: job::build_job(observed),
            deployment: deployment::build_deployment(observed),
            service: network::build_service(observed),
            ingress: network::build_ingress(observed),
        }
    }
}
