use kiln_api::Stage;
use tracing::{debug, warn};

use super::{StageContext, Transition};
use crate::error::OperatorError;

/// Confirm the registry holds the image for the revision.
pub(super) async fn verify_image(ctx: &StageContext<'_>) -> Transition {
    let observed = &ctx.collection.observed;
    let registry_url = observed.config.spec.registry.url.as_deref().unwrap_or_default();
    let repository = &observed.key.name;
    let revision = observed.revision().unwrap_or_default();

    match ctx.registry.has_tag(registry_url, repository, revision).await {
        Ok(true) => {
            debug!(repository = %repository, revision, "Image found in registry");
            Transition::to(Stage::Deploy)
        }
        Ok(false) => {
            warn!(repository = %repository, revision, "Image missing from registry");
            Transition::fail(
                Stage::BuildImageFailed,
                OperatorError::stage(format!("image {repository}:{revision} not found in registry")),
            )
        }
        Err(e) => {
            warn!(repository = %repository, error = %e, "Registry query failed");
            Transition::fail(Stage::BuildImageFailed, e)
        }
    }
}
