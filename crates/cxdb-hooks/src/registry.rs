//! Type registry publishing.
//!
//! The store renders typed records by looking up tag → field names in its
//! registry. The bundle describing every type this hook writes is compiled
//! in and PUT once per router, before the first context is created.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::errors::RegistryError;

/// Bundle identifier in the store registry.
pub const BUNDLE_ID: &str = "amplifier.events-v1";

/// The registry bundle document.
pub const BUNDLE_JSON: &str = include_str!("../assets/conversation_bundle.json");

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Parsed registry bundle.
pub fn bundle() -> Result<serde_json::Value, RegistryError> {
    Ok(serde_json::from_str(BUNDLE_JSON)?)
}

/// Publishes the registry bundle.
#[async_trait]
pub trait RegistryPublisher: Send + Sync {
    /// Upload the bundle. Safe to repeat.
    async fn publish(&self) -> Result<(), RegistryError>;
}

/// Publishes over the store's HTTP gateway.
#[derive(Clone, Debug)]
pub struct HttpRegistryPublisher {
    client: reqwest::Client,
    url: String,
}

impl HttpRegistryPublisher {
    /// Publisher targeting `http://{host}:{http_port}`.
    pub fn new(host: &str, http_port: u16) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: format!("http://{host}:{http_port}/v1/registry/bundles/{BUNDLE_ID}"),
        })
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RegistryPublisher for HttpRegistryPublisher {
    async fn publish(&self) -> Result<(), RegistryError> {
        let response = self.client.put(&self.url).json(&bundle()?).send().await?;
        let status = response.status().as_u16();
        if matches!(status, 201 | 204) {
            info!(bundle = BUNDLE_ID, status, "registry bundle published");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(RegistryError::Status {
            status,
            body: body.chars().take(200).collect(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
