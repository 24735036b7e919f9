//! Configuration for the operator.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use kiln_api::Defaults;
use kiln_reconcile::{DEFAULT_ERROR_BACKOFF, DEFAULT_REQUEUE_DELAY};

/// Operator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace holding `EnvironmentConfig` objects and storage credentials.
    pub config_namespace: String,

    /// Status service listen address.
    pub status_listen_addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Delay before re-running a pass that ended in a non-terminal stage.
    pub requeue_delay: Duration,

    /// Delay before re-running a pass that returned an error.
    pub error_backoff: Duration,

    /// Ceiling on consecutive passes in a waiting stage. Unbounded when unset.
    pub max_wait_passes: Option<u32>,

    /// Registry query timeout.
    pub registry_timeout: Duration,

    /// Defaults applied to environment and config specs.
    pub defaults: Defaults,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_namespace: "kiln-system".to_string(),
            status_listen_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            log_level: "info".to_string(),
            requeue_delay: DEFAULT_REQUEUE_DELAY,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            max_wait_passes: None,
            registry_timeout: Duration::from_secs(10),
            defaults: Defaults::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let base = Self::default();

        let config_namespace =
            std::env::var("KILN_CONFIG_NAMESPACE").unwrap_or(base.config_namespace);

        let status_listen_addr =
            parse_var("KILN_STATUS_LISTEN_ADDR")?.unwrap_or(base.status_listen_addr);

        let log_level = std::env::var("KILN_LOG_LEVEL").unwrap_or(base.log_level);

        let requeue_delay = parse_var("KILN_REQUEUE_DELAY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(base.requeue_delay);

        let error_backoff = parse_var("KILN_ERROR_BACKOFF_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(base.error_backoff);

        let max_wait_passes = parse_var("KILN_MAX_WAIT_PASSES")?;

        let registry_timeout = parse_var("KILN_REGISTRY_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(base.registry_timeout);

        let d = base.defaults;
        let defaults = Defaults {
            replicas: parse_var("KILN_DEFAULT_REPLICAS")?.unwrap_or(d.replicas),
            build_image: std::env::var("KILN_DEFAULT_BUILD_IMAGE").unwrap_or(d.build_image),
            dockerfile: std::env::var("KILN_DEFAULT_DOCKERFILE").unwrap_or(d.dockerfile),
            platform: std::env::var("KILN_DEFAULT_PLATFORM").unwrap_or(d.platform),
            verbosity: std::env::var("KILN_DEFAULT_VERBOSITY").unwrap_or(d.verbosity),
            backoff_limit: parse_var("KILN_DEFAULT_BACKOFF_LIMIT")?.unwrap_or(d.backoff_limit),
            active_deadline_seconds: parse_var("KILN_DEFAULT_ACTIVE_DEADLINE_SECS")?
                .unwrap_or(d.active_deadline_seconds),
            storage_bucket: std::env::var("KILN_DEFAULT_BUCKET").unwrap_or(d.storage_bucket),
            storage_region: std::env::var("KILN_DEFAULT_REGION").unwrap_or(d.storage_region),
            storage_endpoint: std::env::var("KILN_DEFAULT_ENDPOINT")
                .ok()
                .or(d.storage_endpoint),
            storage_prefix: std::env::var("KILN_DEFAULT_PREFIX").unwrap_or(d.storage_prefix),
            registry_url: std::env::var("KILN_DEFAULT_REGISTRY_URL").unwrap_or(d.registry_url),
            registry_node_port: parse_var("KILN_DEFAULT_REGISTRY_NODE_PORT")?
                .unwrap_or(d.registry_node_port),
            service_type: d.service_type,
            ingress_path: d.ingress_path,
        };

        Ok(Self {
            config_namespace,
            status_listen_addr,
            log_level,
            requeue_delay,
            error_backoff,
            max_wait_passes,
            registry_timeout,
            defaults,
        })
    }
}

/// Parse an optional environment variable, failing on malformed values.
fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value for {name}: {raw:?}")),
        Err(_) => Ok(None),
    }
}
