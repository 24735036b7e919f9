//! The `Environment` custom resource.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{
    ContainerPort, EnvVar, Lifecycle, Probe, ResourceRequirements, ServicePort,
};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::defaults::{fill, Defaults};
use crate::stage::Stage;

/// Desired shape of one development environment.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "kiln.dev",
    version = "v1alpha1",
    kind = "Environment",
    plural = "environments",
    shortname = "env",
    namespaced,
    schema = "disabled",
    status = "EnvironmentStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSpec {
    /// Opaque source revision; changes whenever the uploaded source changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// Name of the `EnvironmentConfig` to use. Defaults to the environment name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<ContainerPort>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvVar>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_probe: Option<Probe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,

    #[serde(default)]
    pub build: BuildSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressSettings>,
}

/// Image build parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    /// Builder image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Dockerfile path relative to the archive root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,

    /// Target platform, e.g. `linux/arm64`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    /// Globs the CLI packs into the archive.
    #[serde(default)]
    pub include: Vec<String>,

    /// Globs the CLI leaves out of the archive.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Explicit builder arguments; used verbatim when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    /// Extra variables for the build container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvVar>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_limit: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,
}

/// Service exposure toggle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    /// Explicit service ports. Derived from the container ports when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<ServicePort>>,
}

/// Ingress exposure toggle. Only honored when the service is enabled too.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret_name: Option<String>,
}

/// Observed lifecycle of an environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentStatus {
    #[serde(default)]
    pub stage: Stage,

    /// Revision the pipeline last initialized for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_revision: Option<String>,

    /// Revision currently running with all replicas available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_revision: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl EnvironmentSpec {
    /// Fill unset optional fields with operator defaults.
    pub fn apply_defaults(&mut self, defaults: &Defaults) {
        fill(&mut self.replicas, &defaults.replicas);

        let build = &mut self.build;
        fill(&mut build.image, &defaults.build_image);
        fill(&mut build.dockerfile, &defaults.dockerfile);
        fill(&mut build.platform, &defaults.platform);
        fill(&mut build.verbosity, &defaults.verbosity);
        fill(&mut build.backoff_limit, &defaults.backoff_limit);
        fill(&mut build.active_deadline_seconds, &defaults.active_deadline_seconds);

        if let Some(service) = self.service.as_mut() {
            fill(&mut service.type_, &defaults.service_type);
        }
        if let Some(ingress) = self.ingress.as_mut() {
            fill(&mut ingress.path, &defaults.ingress_path);
        }
    }

    /// Replica count after defaulting.
    pub fn replica_count(&self) -> i32 {
        self.replicas.unwrap_or(1)
    }

    pub fn service_enabled(&self) -> bool {
        self.service.as_ref().is_some_and(|s| s.enabled)
    }

    /// Ingress requires both toggles.
    pub fn ingress_enabled(&self) -> bool {
        self.service_enabled() && self.ingress.as_ref().is_some_and(|i| i.enabled)
    }
}

impl Environment {
    /// Status, or the initial status for a freshly created environment.
    pub fn status_or_default(&self) -> EnvironmentStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Name of the `EnvironmentConfig` this environment resolves.
    pub fn config_name(&self) -> String {
        self.spec
            .config
            .clone()
            .or_else(|| self.metadata.name.clone())
            .unwrap_or_default()
    }
}
