//! End-to-end pipeline passes against the in-memory store and registry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::apps::v1::DeploymentStatus;
use k8s_openapi::api::batch::v1::JobStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kiln_api::{EnvironmentStatus, Stage};
use kiln_operator::config::Config;
use kiln_operator::handler::{Handler, PassOutcome};
use kiln_operator::registry::MockRegistry;
use kiln_operator::store::{Kind, MemoryStore, ObjectKey, ObjectStore, StoreCall};
use kiln_operator::testing;
use kiln_reconcile::{StatusTracker, TrackingKey};

struct Harness {
    store: Arc<MemoryStore>,
    registry: Arc<MockRegistry>,
    handler: Handler,
}

impl Harness {
    async fn new(revision: &str) -> Self {
        let store = Arc::new(testing::seeded_store(revision).await.unwrap());
        let registry = Arc::new(MockRegistry::new());
        let handler = Handler::new(
            store.clone(),
            registry.clone(),
            Arc::new(StatusTracker::new()),
            Config::default(),
        );
        Self {
            store,
            registry,
            handler,
        }
    }

    async fn pass(&self) -> PassOutcome {
        self.handler.reconcile(&testing::key()).await.unwrap()
    }

    async fn status(&self) -> EnvironmentStatus {
        self.store
            .get_environment(&testing::key())
            .await
            .unwrap()
            .unwrap()
            .status
            .unwrap_or_default()
    }

    async fn stage(&self) -> Stage {
        self.status().await.stage
    }

    async fn complete_build(&self) {
        let key = ObjectKey::new(testing::NAMESPACE, "web-build");
        let mut job = self.store.get_job(&key).await.unwrap().unwrap();
        job.status = Some(JobStatus {
            succeeded: Some(1),
            completion_time: Some(Time(Utc::now())),
            ..Default::default()
        });
        self.store.put(Kind::Job, &job).await.unwrap();
    }

    async fn make_available(&self, replicas: i32) {
        let mut deployment = self
            .store
            .get_deployment(&testing::key())
            .await
            .unwrap()
            .unwrap();
        deployment.status = Some(DeploymentStatus {
            replicas: Some(replicas),
            updated_replicas: Some(replicas),
            available_replicas: Some(replicas),
            ..Default::default()
        });
        self.store.put(Kind::Deployment, &deployment).await.unwrap();
    }

    async fn set_revision(&self, revision: &str) {
        let mut environment = self
            .store
            .get_environment(&testing::key())
            .await
            .unwrap()
            .unwrap();
        environment.spec.revision = Some(revision.to_string());
        self.store.put(Kind::Environment, &environment).await.unwrap();
    }
}

async fn deploy_first_revision(h: &Harness) {
    let requeue = PassOutcome::Requeue(Duration::from_secs(1));

    assert_eq!(h.pass().await, requeue);
    assert_eq!(h.stage().await, Stage::BuildImage);
    assert_eq!(h.status().await.expected_revision.as_deref(), Some("1"));

    assert_eq!(h.pass().await, requeue);
    assert_eq!(h.stage().await, Stage::BuildImageWait);

    // Build still running.
    h.pass().await;
    assert_eq!(h.stage().await, Stage::BuildImageWait);

    h.complete_build().await;
    h.pass().await;
    assert_eq!(h.stage().await, Stage::BuildImageVerify);

    h.registry.push("web", "1").await;
    h.pass().await;
    assert_eq!(h.stage().await, Stage::Deploy);

    h.pass().await;
    assert_eq!(h.stage().await, Stage::DeployVerify);

    // No replica available yet.
    assert_eq!(h.pass().await, requeue);
    assert_eq!(h.stage().await, Stage::DeployVerify);

    h.make_available(1).await;
    assert_eq!(h.pass().await, PassOutcome::Deployed);

    let status = h.status().await;
    assert_eq!(status.stage, Stage::Deployed);
    assert_eq!(status.deployed_revision.as_deref(), Some("1"));
}

#[tokio::test]
async fn test_revision_is_built_and_deployed() {
    let h = Harness::new("1").await;
    deploy_first_revision(&h).await;

    let info = h
        .handler
        .tracker()
        .get(&TrackingKey::new(testing::NAMESPACE, testing::NAME))
        .unwrap();
    assert_eq!(info.stage, Stage::Deployed);
    assert_eq!(info.last_stage, Stage::DeployVerify);
    assert!(info.is_deployed());
}

#[tokio::test]
async fn test_deployed_environment_is_left_alone() {
    let h = Harness::new("1").await;
    deploy_first_revision(&h).await;
    h.store.clear_calls().await;

    assert_eq!(h.pass().await, PassOutcome::Idle(Stage::Deployed));
    assert_eq!(h.pass().await, PassOutcome::Idle(Stage::Deployed));
    assert!(h.store.calls().await.is_empty());
}

#[tokio::test]
async fn test_new_revision_replaces_build_job() {
    let h = Harness::new("1").await;
    deploy_first_revision(&h).await;

    h.set_revision("2").await;
    h.pass().await;
    let status = h.status().await;
    assert_eq!(status.stage, Stage::BuildImage);
    assert_eq!(status.expected_revision.as_deref(), Some("2"));
    assert_eq!(status.deployed_revision.as_deref(), Some("1"));

    h.store.clear_calls().await;
    h.pass().await;
    assert_eq!(h.stage().await, Stage::BuildImageWait);

    let job_key = ObjectKey::new(testing::NAMESPACE, "web-build");
    let calls = h.store.calls().await;
    assert_eq!(
        &calls[..2],
        &[
            StoreCall::Delete(Kind::Job, job_key.clone()),
            StoreCall::Create(Kind::Job, job_key.clone()),
        ]
    );

    let job = h.store.get_job(&job_key).await.unwrap().unwrap();
    let args = job.spec.unwrap().template.spec.unwrap().containers[0]
        .args
        .clone()
        .unwrap();
    assert!(args.iter().any(|a| a.ends_with("/web:2")));
}

#[tokio::test]
async fn test_missing_image_halts_pipeline() {
    let h = Harness::new("1").await;
    h.pass().await;
    h.pass().await;
    h.complete_build().await;
    h.pass().await;
    assert_eq!(h.stage().await, Stage::BuildImageVerify);

    // Registry never received the tag.
    assert!(h.handler.reconcile(&testing::key()).await.is_err());
    assert_eq!(h.stage().await, Stage::BuildImageFailed);

    h.store.clear_calls().await;
    assert_eq!(h.pass().await, PassOutcome::Idle(Stage::BuildImageFailed));
    assert!(h.store.calls().await.is_empty());

    // A new revision restarts it.
    h.set_revision("2").await;
    h.pass().await;
    assert_eq!(h.stage().await, Stage::BuildImage);
}
