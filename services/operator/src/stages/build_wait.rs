use k8s_openapi::api::batch::v1::Job;
use kiln_api::Stage;
use tracing::{debug, warn};

use super::{StageContext, Transition};
use crate::error::OperatorError;

/// Follow the build job until it completes or fails.
pub(super) fn wait_for_build(ctx: &StageContext<'_>) -> Transition {
    let observed = &ctx.collection.observed;

    let Some(job) = &observed.job else {
        warn!(key = %observed.key, "Build job disappeared, rebuilding");
        return Transition::to(Stage::BuildImage);
    };
    let Some(status) = &job.status else {
        return Transition::to(Stage::BuildImageWait);
    };

    let active = status.active.unwrap_or(0);
    let failed = status.failed.unwrap_or(0);

    // Pods failed but the job is still retrying within its backoff limit.
    if active > 0 && failed > 0 {
        debug!(key = %observed.key, active, failed, "Build is failing");
        return Transition::to(Stage::BuildImageFailing);
    }

    if status.completion_time.is_some() {
        debug!(key = %observed.key, "Build completed");
        return Transition::to(Stage::BuildImageVerify);
    }

    if let Some(reason) = failure_reason(job) {
        warn!(key = %observed.key, reason = %reason, "Build job failed");
        return Transition::fail(
            Stage::BuildImageFailed,
            OperatorError::stage(format!("build job failed: {reason}")),
        );
    }

    Transition::to(Stage::BuildImageWait)
}

/// Reason of a true `Failed` condition, if the job has one.
fn failure_reason(job: &Job) -> Option<String> {
    job.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == "Failed" && c.status == "True")
        .map(|c| {
            c.message
                .clone()
                .or_else(|| c.reason.clone())
                .unwrap_or_else(|| "unknown".to_string())
        })
}
