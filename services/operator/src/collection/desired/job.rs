//! Desired image build job.
//!
//! The build runs a Dockerfile builder (kaniko by default) against the source
//! archive the CLI uploaded to object storage and pushes the result to the
//! registry tagged with the environment's revision.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{
    Job, JobSpec, PodFailurePolicy, PodFailurePolicyOnPodConditionsPattern, PodFailurePolicyRule,
};
use k8s_openapi::api::core::v1::{
    Container, EnvFromSource, EnvVar, PodSpec, PodTemplateSpec, SecretEnvSource,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kiln_api::naming;

use super::metadata::{owned_meta, revision_annotations};
use crate::collection::Observed;

const BUILDER_CONTAINER: &str = "builder";

/// Compute the build job for the observed environment.
pub(crate) fn build_job(observed: &Observed) -> Job {
    let name = naming::build_job_name(&observed.key.name);
    let build = &observed.environment.spec.build;

    // Jobs are recreated rather than updated, so nothing is merged from the
    // observed job.
    let metadata = owned_meta(observed, name, "build");

    let args = match &build.args {
        Some(args) => args.clone(),
        None => builder_args(observed),
    };

    let env = merge_env(storage_env(observed), build.env.clone().unwrap_or_default());

    let env_from = observed.credentials.as_ref().map(|secret| {
        vec![secret_env_source(
            secret.metadata.name.as_deref().unwrap_or_default(),
        )]
    });

    let container = Container {
        name: BUILDER_CONTAINER.to_string(),
        image: build.image.clone(),
        args: Some(args),
        env: Some(env),
        env_from,
        ..Default::default()
    };

    Job {
        metadata,
        spec: Some(JobSpec {
            backoff_limit: build.backoff_limit,
            active_deadline_seconds: build.active_deadline_seconds,
            pod_failure_policy: Some(pod_failure_policy()),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(naming::environment_labels(&observed.key.name)),
                    annotations: Some(revision_annotations(observed)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    // Required by the pod failure policy.
                    restart_policy: Some("Never".to_string()),
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Builder arguments synthesized from the build spec.
fn builder_args(observed: &Observed) -> Vec<String> {
    let build = &observed.environment.spec.build;
    let storage = &observed.config.spec.storage;
    let name = &observed.key.name;
    let revision = observed.revision().unwrap_or_default();
    let registry = observed.config.spec.registry_host();

    let key = naming::source_archive_key(
        storage.prefix.as_deref().unwrap_or_default(),
        &observed.key.namespace,
        name,
        revision,
    );

    let mut args = vec![
        format!("--dockerfile={}", build.dockerfile.as_deref().unwrap_or_default()),
        format!(
            "--context=s3://{}/{}",
            storage.bucket.as_deref().unwrap_or_default(),
            key
        ),
        format!("--destination={registry}/{name}:{revision}"),
        "--cache=true".to_string(),
        format!("--cache-repo={registry}/{name}/cache"),
        format!(
            "--custom-platform={}",
            build.platform.as_deref().unwrap_or_default()
        ),
        format!("--verbosity={}", build.verbosity.as_deref().unwrap_or_default()),
    ];

    let plain_http = observed
        .config
        .spec
        .registry
        .url
        .as_deref()
        .is_some_and(|url| url.starts_with("http://"));
    if plain_http {
        args.push("--insecure".to_string());
    }

    args
}

/// Connectivity variables for the object store holding the source archive.
///
/// Values default to the config's storage settings; `region` and `endpoint`
/// keys in the storage credentials secret override them.
fn storage_env(observed: &Observed) -> Vec<EnvVar> {
    let storage = &observed.config.spec.storage;
    let from_secret = |key: &str| -> Option<String> {
        observed
            .storage_credentials
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok())
    };

    let region = from_secret("region").or_else(|| storage.region.clone());
    let endpoint = from_secret("endpoint").or_else(|| storage.endpoint.clone());
    let path_style = endpoint.is_some();

    let mut env = vec![literal("AWS_REGION", region.unwrap_or_default())];
    if let Some(endpoint) = endpoint {
        env.push(literal("S3_ENDPOINT", endpoint));
    }
    env.push(literal("S3_FORCE_PATH_STYLE", path_style.to_string()));
    env
}

fn literal(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    }
}

/// Merge two variable lists; entries in `overrides` win on name collision.
/// Order follows first appearance.
pub(crate) fn merge_env(base: Vec<EnvVar>, overrides: Vec<EnvVar>) -> Vec<EnvVar> {
    let mut positions: BTreeMap<String, usize> = BTreeMap::new();
    let mut merged: Vec<EnvVar> = Vec::with_capacity(base.len() + overrides.len());

    for var in base.into_iter().chain(overrides) {
        match positions.get(&var.name) {
            Some(&index) => merged[index] = var,
            None => {
                positions.insert(var.name.clone(), merged.len());
                merged.push(var);
            }
        }
    }
    merged
}

/// Pod-level disruptions (preemption, eviction, node drain) do not count
/// against the backoff limit; only failures of the build itself do.
fn pod_failure_policy() -> PodFailurePolicy {
    PodFailurePolicy {
        rules: vec![PodFailurePolicyRule {
            action: "Ignore".to_string(),
            on_pod_conditions: vec![PodFailurePolicyOnPodConditionsPattern {
                type_: "DisruptionTarget".to_string(),
                status: "True".to_string().into(),
            }]
            .into(),
            ..Default::default()
        }],
    }
}

fn secret_env_source(secret_name: &str) -> EnvFromSource {
    EnvFromSource {
        secret_ref: Some(SecretEnvSource {
            name: secret_name.to_string().into(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The parts of a build job this operator controls.
///
/// Server-populated fields (resource version, timestamps, defaulted container
/// fields, generated selector labels) are left out so an observed job compares
/// equal to the desired job it was created from.
#[derive(Debug, PartialEq)]
pub(crate) struct JobShape<'a> {
    revision: Option<&'a String>,
    image: Option<&'a String>,
    command: Option<&'a Vec<String>>,
    args: Option<&'a Vec<String>>,
    env: Option<&'a Vec<EnvVar>>,
    env_from: Option<&'a Vec<EnvFromSource>>,
    backoff_limit: Option<i32>,
    active_deadline_seconds: Option<i64>,
    pod_failure_policy: Option<&'a PodFailurePolicy>,
}

impl<'a> JobShape<'a> {
    pub(crate) fn of(job: &'a Job) -> Self {
        let spec = job.spec.as_ref();
        let container = spec
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|p| p.containers.iter().find(|c| c.name == BUILDER_CONTAINER));

        Self {
            revision: job
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(naming::REVISION_ANNOTATION)),
            image: container.and_then(|c| c.image.as_ref()),
            command: container.and_then(|c| c.command.as_ref()),
            args: container.and_then(|c| c.args.as_ref()),
            env: container.and_then(|c| c.env.as_ref()),
            env_from: container.and_then(|c| c.env_from.as_ref()),
            backoff_limit: spec.and_then(|s| s.backoff_limit),
            active_deadline_seconds: spec.and_then(|s| s.active_deadline_seconds),
            pod_failure_policy: spec.and_then(|s| s.pod_failure_policy.as_ref()),
        }
    }
}

/// Structural equality of two build jobs over the fields this operator controls.
pub fn same_job_shape(observed: &Job, desired: &Job) -> bool {
    JobShape::of(observed) == JobShape::of(desired)
}
