//! HTTP adapters built on reqwest.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::{DiscoveryFeed, PayloadSource};
use crate::domain::{FeedRecord, Item};

/// Downloads payloads with a plain GET
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    /// Create a source whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Create a source around an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PayloadSource for HttpSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn download(&self, locator: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(locator)
            .send()
            .await
            .with_context(|| format!("Failed to request {}", locator))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Download of {} failed with status {}", locator, status);
        }

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {}", locator))?;

        debug!(locator, size = bytes.len(), "Downloaded payload");
        Ok(bytes)
    }
}

/// Polls a JSON endpoint returning an array of feed records
pub struct HttpFeed {
    url: String,
    limit: usize,
    client: reqwest::Client,
}

impl HttpFeed {
    /// Create a feed that keeps the newest `limit` records per poll
    pub fn new(url: impl Into<String>, limit: usize, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            url: url.into(),
            limit,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Parse a feed response body: newest `limit` records, returned oldest first
pub fn parse_feed(body: &serde_json::Value, limit: usize) -> Result<Vec<Item>> {
    let records = body
        .as_array()
        .context("Invalid feed response: expected a JSON array")?;

    let mut parsed: Vec<FeedRecord> = records
        .iter()
        .map(|r| serde_json::from_value(r.clone()).context("Invalid feed record"))
        .collect::<Result<_>>()?;

    // Newest first, missing timestamps last
    parsed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    parsed.truncate(limit);
    parsed.reverse();

    Ok(parsed.into_iter().map(FeedRecord::into_item).collect())
}

#[async_trait]
impl DiscoveryFeed for HttpFeed {
    fn name(&self) -> &str {
        "http"
    }

    async fn poll(&self) -> Result<Vec<Item>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("Failed to poll feed {}", self.url))?
            .error_for_status()
            .with_context(|| format!("Feed {} returned an error", self.url))?;

        let body: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse feed response")?;

        parse_feed(&body, self.limit)
    }
}
