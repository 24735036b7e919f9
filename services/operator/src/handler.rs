//! Reconciliation handler.
//!
//! One call of [`Handler::reconcile`] is one pass over one environment:
//!
//! 1. Collect observed and desired state
//! 2. Track the pre-dispatch status
//! 3. Gate: a new revision restarts the pipeline; an already deployed
//!    revision or a failure stage stops the pass
//! 4. Dispatch the current stage and record its successor
//! 5. Persist status only if it changed, then track the post-dispatch status
//! 6. Requeue unless the environment reached `Deployed`
//!
//! Callers must not run two passes for the same environment concurrently.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kiln_api::Stage;
use kiln_reconcile::{StallTracker, StatusTracker, TrackingKey};
use tracing::{debug, info, instrument, warn};

use crate::collection::Collection;
use crate::config::Config;
use crate::error::OperatorResult;
use crate::registry::TagLister;
use crate::stages::{self, StageContext, Transition};
use crate::store::{ObjectKey, ObjectStore};

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// The environment no longer exists.
    Gone,

    /// Nothing was dispatched. The environment has no revision, already runs
    /// it, or is halted in a failure stage.
    Idle(Stage),

    /// The pass finished the pipeline.
    Deployed,

    /// Run another pass after the delay.
    Requeue(Duration),
}

/// Drives reconciliation passes.
pub struct Handler {
    store: Arc<dyn ObjectStore>,
    registry: Arc<dyn TagLister>,
    tracker: Arc<StatusTracker>,
    stalls: StallTracker,
    config: Config,
}

impl Handler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        registry: Arc<dyn TagLister>,
        tracker: Arc<StatusTracker>,
        config: Config,
    ) -> Self {
        Self {
            store,
            registry,
            tracker,
            stalls: StallTracker::new(config.max_wait_passes),
            config,
        }
    }

    pub fn tracker(&self) -> &Arc<StatusTracker> {
        &self.tracker
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one reconciliation pass for `key`.
    ///
    /// A stage error is returned after the stage it chose has been persisted.
    #[instrument(skip(self), fields(namespace = %key.namespace, name = %key.name))]
    pub async fn reconcile(&self, key: &ObjectKey) -> OperatorResult<PassOutcome> {
        let tracking_key = TrackingKey::new(&key.namespace, &key.name);
        let stall_key = key.to_string();

        let collection = Collection::collect(
            self.store.as_ref(),
            &self.config.config_namespace,
            &self.config.defaults,
            key,
        )
        .await?;
        let Some(collection) = collection else {
            self.tracker.forget(&tracking_key);
            self.stalls.clear(&stall_key);
            return Ok(PassOutcome::Gone);
        };

        let observed = &collection.observed;
        let before = observed.environment.status_or_default();
        let mut status = before.clone();
        self.tracker
            .track(&tracking_key, status.stage.description(), status.stage);

        let Some(revision) = observed.revision() else {
            debug!("No revision requested");
            return Ok(PassOutcome::Idle(status.stage));
        };

        if status.expected_revision.as_deref() != Some(revision) {
            info!(
                revision,
                expected = status.expected_revision.as_deref().unwrap_or_default(),
                stage = %status.stage,
                "Revision changed, restarting pipeline"
            );
            status.stage = Stage::Initialize;
        } else if status.deployed_revision.as_deref() == Some(revision) {
            debug!(revision, "Revision already deployed");
            return Ok(PassOutcome::Idle(status.stage));
        } else if status.stage.is_failure() {
            debug!(stage = %status.stage, "Pipeline halted");
            return Ok(PassOutcome::Idle(status.stage));
        }

        let ctx = StageContext {
            store: self.store.as_ref(),
            registry: self.registry.as_ref(),
            collection: &collection,
        };
        let current = status.stage;
        let Transition { mut next, error } = stages::dispatch(current, &ctx, &mut status).await;

        if let Some(e) = &error {
            warn!(stage = %current, next = %next, error = %e, "Stage failed");
        }

        if self.stalls.record_pass(&stall_key, next) {
            let escalated = escalation(next);
            warn!(
                stage = %next,
                next = %escalated,
                passes = self.stalls.passes(&stall_key),
                "Stage exceeded its wait ceiling"
            );
            self.stalls.clear(&stall_key);
            next = escalated;
        }

        status.stage = next;
        if status != before {
            status.last_updated = Some(Utc::now());
            self.store.update_environment_status(key, &status).await?;
            debug!(stage = %current, next = %next, "Persisted status");
        }

        self.tracker.track(&tracking_key, next.description(), next);

        if let Some(e) = error {
            return Err(e);
        }

        if next == Stage::Deployed {
            Ok(PassOutcome::Deployed)
        } else {
            Ok(PassOutcome::Requeue(self.config.requeue_delay))
        }
    }
}

/// Failure stage a stalled waiting stage escalates to.
fn escalation(stage: Stage) -> Stage {
    match stage {
        Stage::DeployVerify => Stage::DeploymentFailed,
        _ => Stage::BuildImageFailed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MockRegistry;
    use crate::store::{Kind, MemoryStore, StoreCall};
    use crate::testing;
    use kiln_api::EnvironmentStatus;

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: Arc<MockRegistry>,
        handler: Handler,
    }

    async fn fixture(revision: &str, status: Option<EnvironmentStatus>, config: Config) -> Fixture {
        let store = Arc::new(testing::seeded_store(revision).await.unwrap());
        if status.is_some() {
            let mut environment = testing::environment(revision);
            environment.status = status;
            store.put(Kind::Environment, &environment).await.unwrap();
        }
        let registry = Arc::new(MockRegistry::new());
        let handler = Handler::new(
            store.clone(),
            registry.clone(),
            Arc::new(StatusTracker::new()),
            config,
        );
        Fixture {
            store,
            registry,
            handler,
        }
    }

    fn status(stage: Stage, expected: &str, deployed: Option<&str>) -> Option<EnvironmentStatus> {
        Some(EnvironmentStatus {
            stage,
            expected_revision: Some(expected.to_string()),
            deployed_revision: deployed.map(str::to_string),
            last_updated: None,
        })
    }

    async fn persisted(store: &MemoryStore) -> EnvironmentStatus {
        store
            .get_environment(&testing::key())
            .await
            .unwrap()
            .unwrap()
            .status
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_pass_initializes() {
        let f = fixture("1", None, Config::default()).await;

        let outcome = f.handler.reconcile(&testing::key()).await.unwrap();
        assert_eq!(outcome, PassOutcome::Requeue(Duration::from_secs(1)));

        let status = persisted(&f.store).await;
        assert_eq!(status.stage, Stage::BuildImage);
        assert_eq!(status.expected_revision.as_deref(), Some("1"));
        assert!(status.last_updated.is_some());

        let info = f.handler.tracker().get(&TrackingKey::new("dev", "web")).unwrap();
        assert_eq!(info.stage, Stage::BuildImage);
        assert_eq!(info.last_stage, Stage::Initialize);
    }

    #[tokio::test]
    async fn test_deviation_overrides_deployed() {
        let f = fixture("2", status(Stage::Deployed, "1", Some("1")), Config::default()).await;

        f.handler.reconcile(&testing::key()).await.unwrap();

        let status = persisted(&f.store).await;
        assert_eq!(status.stage, Stage::BuildImage);
        assert_eq!(status.expected_revision.as_deref(), Some("2"));
        assert_eq!(status.deployed_revision.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_deviation_overrides_failure() {
        let f = fixture("2", status(Stage::BuildImageFailed, "1", None), Config::default()).await;

        f.handler.reconcile(&testing::key()).await.unwrap();
        assert_eq!(persisted(&f.store).await.stage, Stage::BuildImage);
    }

    #[tokio::test]
    async fn test_deployed_revision_is_skipped() {
        let f = fixture("1", status(Stage::Deployed, "1", Some("1")), Config::default()).await;

        let outcome = f.handler.reconcile(&testing::key()).await.unwrap();
        assert_eq!(outcome, PassOutcome::Idle(Stage::Deployed));
        assert!(f.store.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_stage_halts() {
        let f = fixture("1", status(Stage::DeploymentFailed, "1", None), Config::default()).await;

        let outcome = f.handler.reconcile(&testing::key()).await.unwrap();
        assert_eq!(outcome, PassOutcome::Idle(Stage::DeploymentFailed));
        assert!(f.store.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_status_is_not_written() {
        // Waiting on a job with no progress leaves the status as it was.
        let f = fixture("1", status(Stage::BuildImageWait, "1", None), Config::default()).await;
        let job = testing::collection("1").desired.job;
        f.store.put(Kind::Job, &job).await.unwrap();

        let outcome = f.handler.reconcile(&testing::key()).await.unwrap();
        assert_eq!(outcome, PassOutcome::Requeue(Duration::from_secs(1)));
        assert!(f.store.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_stage_error_is_returned_after_persisting() {
        let f = fixture("1", status(Stage::BuildImageVerify, "1", None), Config::default()).await;
        f.registry.set_unavailable(true).await;

        let result = f.handler.reconcile(&testing::key()).await;
        assert!(result.is_err());
        assert_eq!(persisted(&f.store).await.stage, Stage::BuildImageFailed);
    }

    #[tokio::test]
    async fn test_deploy_conflict_is_retried() {
        let f = fixture("1", status(Stage::Deploy, "1", None), Config::default()).await;
        let deployment = testing::collection("1").desired.deployment;
        f.store.put(Kind::Deployment, &deployment).await.unwrap();
        f.store.conflict_next_replace(Kind::Deployment).await;

        assert!(f.handler.reconcile(&testing::key()).await.is_err());
        assert_eq!(persisted(&f.store).await.stage, Stage::Deploy);

        let outcome = f.handler.reconcile(&testing::key()).await.unwrap();
        assert_eq!(outcome, PassOutcome::Requeue(Duration::from_secs(1)));
        assert_eq!(persisted(&f.store).await.stage, Stage::DeployVerify);
    }

    #[tokio::test]
    async fn test_missing_environment_is_gone() {
        let f = fixture("1", None, Config::default()).await;
        f.handler.reconcile(&testing::key()).await.unwrap();
        f.store.remove(Kind::Environment, &testing::key()).await;

        let outcome = f.handler.reconcile(&testing::key()).await.unwrap();
        assert_eq!(outcome, PassOutcome::Gone);
        assert!(f.handler.tracker().is_empty());
    }

    #[tokio::test]
    async fn test_no_revision_is_idle() {
        let f = fixture("1", None, Config::default()).await;
        let mut environment = testing::environment("1");
        environment.spec.revision = None;
        f.store.put(Kind::Environment, &environment).await.unwrap();

        let outcome = f.handler.reconcile(&testing::key()).await.unwrap();
        assert_eq!(outcome, PassOutcome::Idle(Stage::Initialize));
        assert!(f.store.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_stalled_deploy_escalates() {
        let config = Config {
            max_wait_passes: Some(2),
            ..Config::default()
        };
        let f = fixture("1", status(Stage::DeployVerify, "1", None), config).await;

        for _ in 0..2 {
            f.handler.reconcile(&testing::key()).await.unwrap();
            assert_eq!(persisted(&f.store).await.stage, Stage::DeployVerify);
        }

        f.handler.reconcile(&testing::key()).await.unwrap();
        assert_eq!(persisted(&f.store).await.stage, Stage::DeploymentFailed);
        assert_eq!(
            f.store.calls().await,
            vec![StoreCall::UpdateStatus(testing::key())]
        );
    }
}
