//! Object names, labels and annotation keys derived from an environment.

use std::collections::BTreeMap;

/// API group of the kiln resources.
pub const GROUP: &str = "kiln.dev";

/// Annotation carrying the revision an object was built for.
pub const REVISION_ANNOTATION: &str = "kiln.dev/revision";

/// Annotation marking a storage credential synthesized in memory.
pub const ANONYMOUS_CREDENTIALS_ANNOTATION: &str = "kiln.dev/anonymous-credentials";

/// Label selecting every object that belongs to one environment.
pub const ENVIRONMENT_LABEL: &str = "kiln.dev/environment";

/// Standard managed-by label.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

pub const MANAGER: &str = "kiln-operator";

/// Name of the build job for an environment.
pub fn build_job_name(environment: &str) -> String {
    format!("{environment}-build")
}

/// Name of the environment-scoped credentials secret.
pub fn credentials_secret_name(environment: &str) -> String {
    format!("{environment}-credentials")
}

/// Object-storage key of the source archive for one revision.
pub fn source_archive_key(prefix: &str, namespace: &str, environment: &str, revision: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{namespace}/{environment}/{revision}.tar.gz")
    } else {
        format!("{prefix}/{namespace}/{environment}/{revision}.tar.gz")
    }
}

/// Labels attached to every object created for an environment.
pub fn environment_labels(environment: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (ENVIRONMENT_LABEL.to_string(), environment.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGER.to_string()),
    ])
}

/// Labels selecting the workload pods of an environment.
pub fn selector_labels(environment: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(ENVIRONMENT_LABEL.to_string(), environment.to_string())])
}
