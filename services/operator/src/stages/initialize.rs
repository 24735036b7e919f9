use kiln_api::{EnvironmentStatus, Stage};
use tracing::info;

use super::{StageContext, Transition};

/// Pin the revision this run of the pipeline is for.
pub(super) fn initialize(ctx: &StageContext<'_>, status: &mut EnvironmentStatus) -> Transition {
    let revision = ctx.collection.observed.revision().map(str::to_string);
    info!(
        revision = revision.as_deref().unwrap_or_default(),
        previous = status.expected_revision.as_deref().unwrap_or_default(),
        "Initializing pipeline"
    );
    status.expected_revision = revision;
    Transition::to(Stage::BuildImage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MockRegistry;
    use crate::store::MemoryStore;
    use crate::testing;

    #[tokio::test]
    async fn test_sets_expected_revision() {
        let store = MemoryStore::new();
        let registry = MockRegistry::new();
        let collection = testing::collection("4");
        let ctx = StageContext {
            store: &store,
            registry: &registry,
            collection: &collection,
        };

        let mut status = EnvironmentStatus {
            expected_revision: Some("3".to_string()),
            deployed_revision: Some("3".to_string()),
            ..Default::default()
        };

        let transition = initialize(&ctx, &mut status);
        assert_eq!(transition.next, Stage::BuildImage);
        assert!(transition.error.is_none());
        assert_eq!(status.expected_revision.as_deref(), Some("4"));
        assert_eq!(status.deployed_revision.as_deref(), Some("3"));
        assert!(store.calls().await.is_empty());
    }
}
