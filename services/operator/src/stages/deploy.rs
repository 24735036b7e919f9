use kiln_api::Stage;
use tracing::{debug, info, warn};

use super::{StageContext, Transition};
use crate::error::{OperatorError, OperatorResult};
use crate::store::{ObjectKey, StoreError, StoreResult};

/// Apply the workload objects.
pub(super) async fn deploy(ctx: &StageContext<'_>) -> Transition {
    let observed = &ctx.collection.observed;
    match apply(ctx).await {
        Ok(()) => {
            info!(
                key = %observed.key,
                revision = observed.revision().unwrap_or_default(),
                "Applied workload"
            );
            Transition::to(Stage::DeployVerify)
        }
        // Another writer got there first; apply again on the next pass.
        Err(e @ OperatorError::Store(StoreError::Conflict(_))) => {
            debug!(key = %observed.key, error = %e, "Workload modified concurrently");
            Transition::fail(Stage::Deploy, e)
        }
        Err(e) => {
            warn!(key = %observed.key, error = %e, "Failed to apply workload");
            Transition::fail(Stage::DeploymentFailed, e)
        }
    }
}

async fn apply(ctx: &StageContext<'_>) -> OperatorResult<()> {
    let store = ctx.store;
    let observed = &ctx.collection.observed;
    let desired = &ctx.collection.desired;

    if observed.deployment.is_some() {
        store.replace_deployment(&desired.deployment).await?;
    } else {
        store.create_deployment(&desired.deployment).await?;
    }

    match (&desired.service, &observed.service) {
        (Some(service), Some(_)) => {
            store.replace_service(service).await?;
        }
        (Some(service), None) => {
            store.create_service(service).await?;
        }
        (None, Some(existing)) => {
            let key = ObjectKey::from_meta(&existing.metadata)?;
            info!(service = %key, "Deleting disabled service");
            tolerate_missing(store.delete_service(&key).await)?;
        }
        (None, None) => {}
    }

    match (&desired.ingress, &observed.ingress) {
        (Some(ingress), Some(_)) => {
            store.replace_ingress(ingress).await?;
        }
        (Some(ingress), None) => {
            store.create_ingress(ingress).await?;
        }
        (None, Some(existing)) => {
            let key = ObjectKey::from_meta(&existing.metadata)?;
            info!(ingress = %key, "Deleting disabled ingress");
            tolerate_missing(store.delete_ingress(&key).await)?;
        }
        (None, None) => {}
    }

    Ok(())
}

fn tolerate_missing(result: StoreResult<()>) -> StoreResult<()> {
    match result {
        Err(e) if e.is_not_found() => {
            debug!("Object already gone");
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Collection;
    use crate::registry::MockRegistry;
    use crate::store::{Kind, MemoryStore, StoreCall};
    use crate::testing;

    async fn run(store: &MemoryStore, collection: &Collection) -> Transition {
        let registry = MockRegistry::new();
        let ctx = StageContext {
            store,
            registry: &registry,
            collection,
        };
        deploy(&ctx).await
    }

    fn key() -> ObjectKey {
        testing::key()
    }

    #[tokio::test]
    async fn test_creates_workload() {
        let store = MemoryStore::new();
        let collection = testing::exposed_collection("1");

        let transition = run(&store, &collection).await;
        assert_eq!(transition.next, Stage::DeployVerify);
        assert_eq!(
            store.calls().await,
            vec![
                StoreCall::Create(Kind::Deployment, key()),
                StoreCall::Create(Kind::Service, key()),
                StoreCall::Create(Kind::Ingress, key()),
            ]
        );
    }

    #[tokio::test]
    async fn test_replaces_existing_workload() {
        let store = MemoryStore::new();
        let mut collection = testing::exposed_collection("1");
        let desired = collection.desired.clone();
        store.put(Kind::Deployment, &desired.deployment).await.unwrap();
        store.put(Kind::Service, desired.service.as_ref().unwrap()).await.unwrap();
        store.put(Kind::Ingress, desired.ingress.as_ref().unwrap()).await.unwrap();
        collection.observed.deployment = Some(desired.deployment);
        collection.observed.service = desired.service;
        collection.observed.ingress = desired.ingress;

        let transition = run(&store, &collection).await;
        assert_eq!(transition.next, Stage::DeployVerify);
        assert_eq!(
            store.calls().await,
            vec![
                StoreCall::Replace(Kind::Deployment, key()),
                StoreCall::Replace(Kind::Service, key()),
                StoreCall::Replace(Kind::Ingress, key()),
            ]
        );
    }

    #[tokio::test]
    async fn test_disabled_objects_are_deleted() {
        let store = MemoryStore::new();
        let exposed = testing::exposed_collection("1").desired;
        store.put(Kind::Service, exposed.service.as_ref().unwrap()).await.unwrap();

        let mut collection = testing::collection("1");
        collection.observed.service = exposed.service;
        // Observed, but already gone.
        collection.observed.ingress = exposed.ingress;

        let transition = run(&store, &collection).await;
        assert_eq!(transition.next, Stage::DeployVerify);
        assert!(transition.error.is_none());
        assert_eq!(
            store.calls().await,
            vec![
                StoreCall::Create(Kind::Deployment, key()),
                StoreCall::Delete(Kind::Service, key()),
                StoreCall::Delete(Kind::Ingress, key()),
            ]
        );
    }

    #[tokio::test]
    async fn test_conflict_stays_in_deploy() {
        let store = MemoryStore::new();
        let mut collection = testing::collection("2");
        let existing = testing::collection("1").desired.deployment;
        store.put(Kind::Deployment, &existing).await.unwrap();
        collection.observed.deployment = Some(existing);
        store.conflict_next_replace(Kind::Deployment).await;

        let transition = run(&store, &collection).await;
        assert_eq!(transition.next, Stage::Deploy);
        assert!(matches!(
            transition.error,
            Some(OperatorError::Store(StoreError::Conflict(_)))
        ));

        let transition = run(&store, &collection).await;
        assert_eq!(transition.next, Stage::DeployVerify);
        assert!(transition.error.is_none());
    }

    #[tokio::test]
    async fn test_write_failure() {
        let store = MemoryStore::new();
        store.fail_writes(Kind::Deployment).await;

        let transition = run(&store, &testing::collection("1")).await;
        assert_eq!(transition.next, Stage::DeploymentFailed);
        assert!(transition.error.is_some());
    }
}
