//! Fixtures shared by unit and integration tests.
//!
//! Every fixture describes the same environment: `dev/web`, resolving the
//! `kiln-system/web` config with operator defaults.

use k8s_openapi::api::core::v1::ContainerPort;
use kiln_api::{
    Defaults, Environment, EnvironmentConfig, EnvironmentConfigSpec, EnvironmentSpec,
    IngressSettings, ServiceSettings,
};

use crate::collection::{anonymous_credentials, Collection, Desired, Observed};
use crate::store::{Kind, MemoryStore, ObjectKey, StoreResult};

pub const NAMESPACE: &str = "dev";
pub const NAME: &str = "web";
pub const CONFIG_NAMESPACE: &str = "kiln-system";

pub fn key() -> ObjectKey {
    ObjectKey::new(NAMESPACE, NAME)
}

/// Environment at `revision`, without status.
pub fn environment(revision: &str) -> Environment {
    let mut environment = Environment::new(
        NAME,
        EnvironmentSpec {
            revision: Some(revision.to_string()),
            ..Default::default()
        },
    );
    environment.metadata.namespace = Some(NAMESPACE.to_string());
    environment.metadata.uid = Some("8d0cbf3e-5a43-4c6e-9a57-0d2f1c7b6e21".to_string());
    environment
}

/// Config with every setting left to the operator defaults.
pub fn environment_config() -> EnvironmentConfig {
    let mut config = EnvironmentConfig::new(NAME, EnvironmentConfigSpec::default());
    config.metadata.namespace = Some(CONFIG_NAMESPACE.to_string());
    config
}

/// Memory store holding the environment and its config.
pub async fn seeded_store(revision: &str) -> StoreResult<MemoryStore> {
    let store = MemoryStore::new();
    store.put(Kind::Environment, &environment(revision)).await?;
    store
        .put(Kind::EnvironmentConfig, &environment_config())
        .await?;
    Ok(store)
}

/// Observed state of a fresh environment with nothing built yet.
pub fn observed(revision: &str) -> Observed {
    let defaults = Defaults::default();

    let mut environment = environment(revision);
    environment.spec.apply_defaults(&defaults);
    let mut config = environment_config();
    config.spec.apply_defaults(&defaults);

    Observed {
        key: key(),
        environment,
        config,
        storage_credentials: anonymous_credentials(CONFIG_NAMESPACE),
        job: None,
        deployment: None,
        service: None,
        ingress: None,
        credentials: None,
    }
}

/// Collection for [`observed`].
///
/// # Panics
///
/// Panics if the desired state cannot be built.
pub fn collection(revision: &str) -> Collection {
    collection_of(observed(revision))
}

/// Collection for an environment exposed through a service and ingress on
/// port 8080.
pub fn exposed_collection(revision: &str) -> Collection {
    let mut observed = observed(revision);
    let spec = &mut observed.environment.spec;
    spec.ports = Some(vec![ContainerPort {
        name: Some("http".to_string()),
        container_port: 8080,
        ..Default::default()
    }]);
    spec.service = Some(ServiceSettings {
        enabled: true,
        type_: Some("ClusterIP".to_string()),
        ports: None,
    });
    spec.ingress = Some(IngressSettings {
        enabled: true,
        host: Some("web.dev.example.com".to_string()),
        path: Some("/".to_string()),
        class_name: None,
        tls_secret_name: None,
    });
    collection_of(observed)
}

fn collection_of(observed: Observed) -> Collection {
    let desired = Desired::build(&observed);
    Collection { observed, desired }
}
