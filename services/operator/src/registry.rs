//! Registry tag queries.
//!
//! Image verification only needs one call of the OCI Distribution API:
//! `GET <registry>/v2/<name>/tags/list`, answering `{"name": ..., "tags": [...]}`.
//!
//! Reference: https://github.com/opencontainers/distribution-spec

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Errors from registry queries.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("registry returned {status} for {url}")]
    UnexpectedStatus { status: u16, url: String },
}

/// Lists the tags of a repository.
#[async_trait]
pub trait TagLister: Send + Sync {
    async fn list_tags(&self, registry_url: &str, repository: &str) -> Result<Vec<String>, RegistryError>;

    /// Returns true if `tag` exists in `repository`.
    async fn has_tag(&self, registry_url: &str, repository: &str, tag: &str) -> Result<bool, RegistryError> {
        let tags = self.list_tags(registry_url, repository).await?;
        Ok(tags.iter().any(|t| t == tag))
    }
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// HTTP registry client.
#[derive(Clone)]
pub struct RegistryClient {
    client: Client,
}

impl RegistryClient {
    /// Create a new registry client.
    pub fn new(timeout: Duration) -> Result<Self, RegistryError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

/// Base URL of a registry, assuming plain HTTP when no scheme is given.
fn base_url(registry_url: &str) -> String {
    let url = registry_url.trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

#[async_trait]
impl TagLister for RegistryClient {
    async fn list_tags(&self, registry_url: &str, repository: &str) -> Result<Vec<String>, RegistryError> {
        let url = format!("{}/v2/{}/tags/list", base_url(registry_url), repository);
        debug!(url = %url, "Listing registry tags");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::UnexpectedStatus {
                status: response.status().as_u16(),
                url,
            });
        }

        let body: TagList = response.json().await?;
        Ok(body.tags.unwrap_or_default())
    }
}

/// Registry double with a static set of tags per repository.
#[derive(Default)]
pub struct MockRegistry {
    tags: Mutex<BTreeMap<String, BTreeSet<String>>>,
    unavailable: Mutex<bool>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `tag` as pushed to `repository`.
    pub async fn push(&self, repository: &str, tag: &str) {
        self.tags
            .lock()
            .await
            .entry(repository.to_string())
            .or_default()
            .insert(tag.to_string());
    }

    /// Make every query fail with a 503.
    pub async fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().await = unavailable;
    }
}

#[async_trait]
impl TagLister for MockRegistry {
    async fn list_tags(&self, registry_url: &str, repository: &str) -> Result<Vec<String>, RegistryError> {
        if *self.unavailable.lock().await {
            return Err(RegistryError::UnexpectedStatus {
                status: 503,
                url: format!("{}/v2/{}/tags/list", base_url(registry_url), repository),
            });
        }

        Ok(self
            .tags
            .lock()
            .await
            .get(repository)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default())
    }
}
