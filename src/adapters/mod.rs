//! Adapter interfaces for remote systems.
//!
//! Two seams: where payload bytes come from, and where new items are
//! discovered. Both have reqwest-backed HTTP implementations; tests plug in
//! in-memory ones.

pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::Item;

// Re-export the HTTP adapters
pub use http::{HttpFeed, HttpSource};

/// Downloads payload bytes for a remote locator
#[async_trait]
pub trait PayloadSource: Send + Sync {
    /// Human-readable source name
    fn name(&self) -> &str;

    /// Fetch the full payload behind `locator`
    async fn download(&self, locator: &str) -> Result<Bytes>;
}

/// Reports items currently available upstream
#[async_trait]
pub trait DiscoveryFeed: Send + Sync {
    /// Human-readable feed name
    fn name(&self) -> &str;

    /// List items, oldest first. May repeat items reported before.
    async fn poll(&self) -> Result<Vec<Item>>;
}
