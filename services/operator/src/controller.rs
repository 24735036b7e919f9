//! Controller loop.
//!
//! Watches `Environment` objects and the jobs and deployments they own, and
//! runs a [`Handler`] pass per change. The runtime never runs two passes for
//! the same object at once.

use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use kiln_api::Environment;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::OperatorError;
use crate::handler::{Handler, PassOutcome};
use crate::store::ObjectKey;

/// Map a pass outcome to the controller's next action.
pub fn next_action(outcome: PassOutcome) -> Action {
    match outcome {
        PassOutcome::Requeue(delay) => Action::requeue(delay),
        PassOutcome::Gone | PassOutcome::Idle(_) | PassOutcome::Deployed => Action::await_change(),
    }
}

async fn reconcile(environment: Arc<Environment>, handler: Arc<Handler>) -> Result<Action, OperatorError> {
    let key = ObjectKey::from_meta(&environment.metadata)?;
    let outcome = handler.reconcile(&key).await?;
    Ok(next_action(outcome))
}

fn error_policy(environment: Arc<Environment>, error: &OperatorError, handler: Arc<Handler>) -> Action {
    warn!(
        namespace = %environment.namespace().unwrap_or_default(),
        name = %environment.name_any(),
        error = %error,
        "Reconciliation failed"
    );
    Action::requeue(handler.config().error_backoff)
}

/// Run the controller until shutdown is signaled.
pub async fn run(client: Client, handler: Arc<Handler>, shutdown: watch::Receiver<bool>) {
    info!("Starting environment controller");

    let environments: Api<Environment> = Api::all(client.clone());
    let jobs: Api<Job> = Api::all(client.clone());
    let deployments: Api<Deployment> = Api::all(client);

    Controller::new(environments, watcher::Config::default())
        .owns(jobs, watcher::Config::default())
        .owns(deployments, watcher::Config::default())
        .graceful_shutdown_on(wait_for_shutdown(shutdown))
        .run(reconcile, error_policy, handler)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(object = %object, "Reconciled"),
                Err(e) => debug!(error = %e, "Reconcile not run"),
            }
        })
        .await;

    info!("Environment controller stopped");
}

/// Resolves once shutdown is signalled or the sender is dropped.
pub async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_api::Stage;
    use std::time::Duration;

    #[test]
    fn test_next_action() {
        assert_eq!(
            next_action(PassOutcome::Requeue(Duration::from_secs(1))),
            Action::requeue(Duration::from_secs(1))
        );
        assert_eq!(next_action(PassOutcome::Deployed), Action::await_change());
        assert_eq!(
            next_action(PassOutcome::Idle(Stage::BuildImageFailed)),
            Action::await_change()
        );
        assert_eq!(next_action(PassOutcome::Gone), Action::await_change());
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_on_signal() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(wait_for_shutdown(rx));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_when_already_signalled() {
        let (tx, rx) = watch::channel(true);
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(rx))
            .await
            .unwrap();
        drop(tx);
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_on_dropped_sender() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(rx))
            .await
            .unwrap();
    }
}
