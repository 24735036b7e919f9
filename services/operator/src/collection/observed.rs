//! Observed-state collection.
//!
//! Reads everything one reconciliation pass needs about an environment:
//! - The environment itself (defaulted before anything else is read)
//! - Its `EnvironmentConfig` and storage credentials
//! - The build job, workload objects and environment-scoped credentials
//!
//! Missing build/workload objects are meaningful state and come back as
//! `None`. A missing config or named credential aborts the pass.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kiln_api::naming::{self, ANONYMOUS_CREDENTIALS_ANNOTATION};
use kiln_api::{Defaults, Environment, EnvironmentConfig};
use tracing::{debug, instrument, warn};

use crate::error::{OperatorError, OperatorResult};
use crate::store::{ObjectKey, ObjectStore};

/// As-found cluster state for one environment.
#[derive(Debug, Clone)]
pub struct Observed {
    pub key: ObjectKey,

    /// The environment with defaults applied.
    pub environment: Environment,

    /// The referenced config with defaults applied.
    pub config: EnvironmentConfig,

    /// Object-storage credentials, possibly synthesized.
    pub storage_credentials: Secret,

    pub job: Option<Job>,
    pub deployment: Option<Deployment>,
    pub service: Option<Service>,
    pub ingress: Option<Ingress>,

    /// Environment-scoped credentials (`<name>-credentials`).
    pub credentials: Option<Secret>,
}

impl Observed {
    /// Read the current state of `key`.
    ///
    /// Returns `Ok(None)` if the environment no longer exists.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn collect(
        store: &dyn ObjectStore,
        config_namespace: &str,
        defaults: &Defaults,
        key: &ObjectKey,
    ) -> OperatorResult<Option<Self>> {
        let Some(mut environment) = store.get_environment(key).await? else {
            debug!("Environment is gone");
            return Ok(None);
        };
        environment.spec.apply_defaults(defaults);

        let config_key = ObjectKey::new(config_namespace, environment.config_name());
        let Some(mut config) = store.get_environment_config(&config_key).await? else {
            warn!(config = %config_key, "Environment config not found");
            return Err(OperatorError::MissingConfig {
                namespace: config_key.namespace,
                name: config_key.name,
            });
        };
        config.spec.apply_defaults(defaults);

        let storage_credentials = match &config.spec.storage.credentials_secret {
            None => anonymous_credentials(config_namespace),
            Some(name) => {
                let secret_key = ObjectKey::new(config_namespace, name);
                match store.get_secret(&secret_key).await? {
                    Some(secret) => secret,
                    None => {
                        warn!(secret = %secret_key, "Storage credentials not found");
                        return Err(OperatorError::MissingCredentials {
                            namespace: secret_key.namespace,
                            name: secret_key.name,
                        });
                    }
                }
            }
        };

        let job = store
            .get_job(&key.sibling(naming::build_job_name(&key.name)))
            .await?;
        let deployment = store.get_deployment(key).await?;
        let service = store.get_service(key).await?;
        let ingress = store.get_ingress(key).await?;
        let credentials = store
            .get_secret(&key.sibling(naming::credentials_secret_name(&key.name)))
            .await?;

        debug!(
            has_job = job.is_some(),
            has_deployment = deployment.is_some(),
            has_service = service.is_some(),
            has_ingress = ingress.is_some(),
            has_credentials = credentials.is_some(),
            anonymous_storage = is_anonymous(&storage_credentials),
            "Observed environment state"
        );

        Ok(Some(Self {
            key: key.clone(),
            environment,
            config,
            storage_credentials,
            job,
            deployment,
            service,
            ingress,
            credentials,
        }))
    }

    /// The revision the spec asks for.
    pub fn revision(&self) -> Option<&str> {
        self.environment.spec.revision.as_deref()
    }
}

/// In-memory stand-in for a storage credential when none is configured.
/// Never written to the cluster.
pub(crate) fn anonymous_credentials(namespace: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some("anonymous".to_string()),
            namespace: Some(namespace.to_string()),
            annotations: Some(BTreeMap::from([(
                ANONYMOUS_CREDENTIALS_ANNOTATION.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Returns true if `secret` was synthesized for anonymous storage access.
fn is_anonymous(secret: &Secret) -> bool {
    secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANONYMOUS_CREDENTIALS_ANNOTATION))
        .is_some_and(|v| v == "true")
}
