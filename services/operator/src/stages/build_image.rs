use kiln_api::Stage;
use tracing::{debug, info, warn};

use super::{StageContext, Transition};
use crate::collection::same_job_shape;
use crate::store::{ObjectKey, StoreError};

/// Make sure a build job of the desired shape exists.
pub(super) async fn build_image(ctx: &StageContext<'_>) -> Transition {
    let observed = &ctx.collection.observed;
    let desired = &ctx.collection.desired.job;

    if let Some(existing) = &observed.job {
        if same_job_shape(existing, desired) {
            debug!(key = %observed.key, "Build job already matches, skipping build");
            return Transition::to(Stage::Deploy);
        }

        let key = match ObjectKey::from_meta(&existing.metadata) {
            Ok(key) => key,
            Err(e) => return Transition::fail(Stage::BuildImage, e),
        };
        info!(job = %key, "Deleting stale build job");
        match ctx.store.delete_job(&key).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(job = %key, "Stale build job already gone"),
            Err(e) => return Transition::fail(Stage::BuildImage, e),
        }
    }

    match ctx.store.create_job(desired).await {
        Ok(_) => {
            info!(
                key = %observed.key,
                revision = observed.revision().unwrap_or_default(),
                "Created build job"
            );
            Transition::to(Stage::BuildImageWait)
        }
        // The deleted job is still terminating; try again next pass.
        Err(StoreError::AlreadyExists(name)) => {
            debug!(job = %name, "Previous build job still terminating");
            Transition::to(Stage::BuildImage)
        }
        Err(e) => {
            warn!(key = %observed.key, error = %e, "Failed to create build job");
            Transition::fail(Stage::BuildImageFailed, e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MockRegistry;
    use crate::store::{Kind, MemoryStore, StoreCall};
    use crate::testing;

    async fn run(store: &MemoryStore, collection: &crate::collection::Collection) -> Transition {
        let registry = MockRegistry::new();
        let ctx = StageContext {
            store,
            registry: &registry,
            collection,
        };
        build_image(&ctx).await
    }

    fn job_key() -> ObjectKey {
        ObjectKey::new("dev", "web-build")
    }

    #[tokio::test]
    async fn test_creates_job() {
        let store = MemoryStore::new();
        let collection = testing::collection("1");

        let transition = run(&store, &collection).await;
        assert_eq!(transition.next, Stage::BuildImageWait);
        assert!(transition.error.is_none());
        assert_eq!(store.calls().await, vec![StoreCall::Create(Kind::Job, job_key())]);
    }

    #[tokio::test]
    async fn test_matching_job_skips_to_deploy() {
        let store = MemoryStore::new();
        let mut collection = testing::collection("1");
        collection.observed.job = Some(collection.desired.job.clone());

        let transition = run(&store, &collection).await;
        assert_eq!(transition.next, Stage::Deploy);
        assert!(store.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_job_is_replaced() {
        let store = MemoryStore::new();
        let stale = testing::collection("1").desired.job;
        store.put(Kind::Job, &stale).await.unwrap();

        let mut collection = testing::collection("2");
        collection.observed.job = Some(stale);

        let transition = run(&store, &collection).await;
        assert_eq!(transition.next, Stage::BuildImageWait);
        assert_eq!(
            store.calls().await,
            vec![
                StoreCall::Delete(Kind::Job, job_key()),
                StoreCall::Create(Kind::Job, job_key()),
            ]
        );
    }

    #[tokio::test]
    async fn test_job_vanished_before_delete() {
        let store = MemoryStore::new();
        let mut collection = testing::collection("2");
        // Observed, but gone by the time we delete it.
        collection.observed.job = Some(testing::collection("1").desired.job);

        let transition = run(&store, &collection).await;
        assert_eq!(transition.next, Stage::BuildImageWait);
        assert!(transition.error.is_none());
    }

    #[tokio::test]
    async fn test_create_failure() {
        let store = MemoryStore::new();
        store.fail_writes(Kind::Job).await;
        let collection = testing::collection("1");

        let transition = run(&store, &collection).await;
        assert_eq!(transition.next, Stage::BuildImageFailed);
        assert!(transition.error.is_some());
    }

    #[tokio::test]
    async fn test_terminating_job_retries() {
        let store = MemoryStore::new();
        store
            .put(Kind::Job, &testing::collection("1").desired.job)
            .await
            .unwrap();
        // Nothing observed, yet the name is still taken.
        let collection = testing::collection("2");

        let transition = run(&store, &collection).await;
        assert_eq!(transition.next, Stage::BuildImage);
        assert!(transition.error.is_none());
    }
}
