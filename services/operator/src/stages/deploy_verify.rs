use k8s_openapi::api::apps::v1::Deployment;
use kiln_api::naming::REVISION_ANNOTATION;
use kiln_api::{EnvironmentStatus, Stage};
use tracing::{debug, info};

use super::{StageContext, Transition};

/// Wait until the rollout of the revision is observed and every replica
/// is updated and available.
pub(super) fn verify_deployment(
    ctx: &StageContext<'_>,
    status: &mut EnvironmentStatus,
) -> Transition {
    let observed = &ctx.collection.observed;
    let revision = observed.revision();
    let replicas = observed.environment.spec.replica_count();

    let Some(deployment) = &observed.deployment else {
        debug!(key = %observed.key, "Deployment not observed yet");
        return Transition::to(Stage::DeployVerify);
    };

    if deployed_revision(deployment) != revision {
        debug!(key = %observed.key, "Deployment still on a previous revision");
        return Transition::to(Stage::DeployVerify);
    }

    if !rollout_observed(deployment) {
        debug!(key = %observed.key, "Rollout not observed by the deployment controller yet");
        return Transition::to(Stage::DeployVerify);
    }

    let rollout = replica_counts(deployment);
    if rollout.updated < replicas || rollout.available < replicas {
        debug!(
            key = %observed.key,
            updated = rollout.updated,
            available = rollout.available,
            replicas,
            "Waiting for replicas"
        );
        return Transition::to(Stage::DeployVerify);
    }

    info!(
        key = %observed.key,
        revision = revision.unwrap_or_default(),
        "Environment deployed"
    );
    status.deployed_revision = revision.map(str::to_string);
    Transition::to(Stage::Deployed)
}

fn deployed_revision(deployment: &Deployment) -> Option<&str> {
    deployment
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(REVISION_ANNOTATION))
        .map(String::as_str)
}

/// The deployment controller has caught up with the latest spec change.
/// A deployment without a generation has never been through the API server.
fn rollout_observed(deployment: &Deployment) -> bool {
    let Some(generation) = deployment.metadata.generation else {
        return true;
    };
    let observed = deployment
        .status
        .as_ref()
        .and_then(|s| s.observed_generation)
        .unwrap_or(0);
    observed >= generation
}

struct ReplicaCounts {
    updated: i32,
    available: i32,
}

fn replica_counts(deployment: &Deployment) -> ReplicaCounts {
    let status = deployment.status.as_ref();
    ReplicaCounts {
        updated: status.and_then(|s| s.updated_replicas).unwrap_or(0),
        available: status.and_then(|s| s.available_replicas).unwrap_or(0),
    }
}
