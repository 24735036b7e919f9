//! Operator-wide defaults applied to specs right after they are read.

/// Defaults filled into unset optional spec fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defaults {
    pub replicas: i32,
    pub build_image: String,
    pub dockerfile: String,
    pub platform: String,
    pub verbosity: String,
    pub backoff_limit: i32,
    pub active_deadline_seconds: i64,
    pub storage_bucket: String,
    pub storage_region: String,
    pub storage_endpoint: Option<String>,
    pub storage_prefix: String,
    pub registry_url: String,
    pub registry_node_port: i32,
    pub service_type: String,
    pub ingress_path: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            replicas: 1,
            build_image: "gcr.io/kaniko-project/executor:v1.23.2".to_string(),
            dockerfile: "Dockerfile".to_string(),
            platform: "linux/amd64".to_string(),
            verbosity: "info".to_string(),
            backoff_limit: 3,
            active_deadline_seconds: 30 * 60,
            storage_bucket: "kiln-sources".to_string(),
            storage_region: "us-east-1".to_string(),
            storage_endpoint: None,
            storage_prefix: "sources".to_string(),
            registry_url: "http://registry.kiln-system.svc.cluster.local:5000".to_string(),
            registry_node_port: 30500,
            service_type: "ClusterIP".to_string(),
            ingress_path: "/".to_string(),
        }
    }
}

/// Fill `slot` with `value` if it is unset.
pub(crate) fn fill<T: Clone>(slot: &mut Option<T>, value: &T) {
    if slot.is_none() {
        *slot = Some(value.clone());
    }
}
