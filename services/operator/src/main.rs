//! kiln operator
//!
//! Reconciles `Environment` objects and serves their live status.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kiln_api::{Environment, EnvironmentConfig};
use kiln_operator::config::Config;
use kiln_operator::handler::Handler;
use kiln_operator::registry::RegistryClient;
use kiln_operator::store::KubeStore;
use kiln_operator::{controller, status_api};
use kiln_reconcile::StatusTracker;
use kube::{Client, CustomResourceExt};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "kiln-operator", version, about = "Builds and deploys kiln environments")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the controller and the status service (default).
    Run,

    /// Print the custom resource definitions as JSON.
    Crds,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run().await,
        Command::Crds => print_crds(),
    }
}

fn print_crds() -> Result<()> {
    for crd in [Environment::crd(), EnvironmentConfig::crd()] {
        println!("{}", serde_json::to_string_pretty(&crd)?);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;

    // Prefer RUST_LOG, fall back to KILN_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting kiln operator");
    info!(
        config_namespace = %config.config_namespace,
        status_listen_addr = %config.status_listen_addr,
        max_wait_passes = ?config.max_wait_passes,
        "Configuration loaded"
    );

    let client = Client::try_default()
        .await
        .context("failed to create cluster client")?;
    let registry = RegistryClient::new(config.registry_timeout)?;
    let tracker = Arc::new(StatusTracker::new());
    let handler = Arc::new(Handler::new(
        Arc::new(KubeStore::new(client.clone())),
        Arc::new(registry),
        tracker.clone(),
        config.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let controller_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        controller::run(client, handler, shutdown_rx)
    });

    let app = status_api::create_router(tracker);
    let listener = tokio::net::TcpListener::bind(&config.status_listen_addr).await?;
    info!(addr = %config.status_listen_addr, "Status service listening");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                controller::wait_for_shutdown(shutdown_rx).await;
                info!("Status service shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Status service exited"),
                Ok(Err(e)) => error!(error = %e, "Status service error"),
                Err(e) => error!(error = %e, "Status service task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for the controller to stop...");
    if let Err(e) = tokio::time::timeout(Duration::from_secs(10), controller_handle).await {
        warn!(error = %e, "Controller did not stop in time");
    }

    info!("Operator shutdown complete");
    Ok(())
}
