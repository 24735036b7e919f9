//! The `EnvironmentConfig` custom resource.
//!
//! Operator-scoped settings shared by environments: where source archives
//! live in object storage and which registry receives built images. Configs
//! live in the controller namespace and are only read by the operator.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::defaults::{fill, Defaults};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "kiln.dev",
    version = "v1alpha1",
    kind = "EnvironmentConfig",
    plural = "environmentconfigs",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConfigSpec {
    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub registry: RegistrySettings,
}

/// Object storage holding uploaded source archives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSettings {
    /// Custom endpoint for S3-compatible stores. Implies path-style access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Secret in the config namespace holding access keys. Anonymous access
    /// when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_secret: Option<String>,
}

/// Registry receiving built images.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySettings {
    /// Registry base URL used by the builder and for tag verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Node port the registry is reachable on from every node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port: Option<i32>,
}

impl EnvironmentConfigSpec {
    /// Fill unset storage and registry settings with operator defaults.
    pub fn apply_defaults(&mut self, defaults: &Defaults) {
        let storage = &mut self.storage;
        fill(&mut storage.bucket, &defaults.storage_bucket);
        fill(&mut storage.region, &defaults.storage_region);
        fill(&mut storage.prefix, &defaults.storage_prefix);
        if storage.endpoint.is_none() {
            storage.endpoint = defaults.storage_endpoint.clone();
        }

        fill(&mut self.registry.url, &defaults.registry_url);
        fill(&mut self.registry.node_port, &defaults.registry_node_port);
    }

    /// Registry host without scheme or trailing slash, as used in image references.
    pub fn registry_host(&self) -> String {
        let url = self.registry.url.as_deref().unwrap_or_default();
        url.trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string()
    }
}
