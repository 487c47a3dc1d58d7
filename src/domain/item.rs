//! Media items reported by the discovery feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque item identity, unique across the discovery stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Create an identity from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Engagement counters carried through from the feed.
///
/// Nothing in the window or cache reads these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// When the remote source created the item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub views: u64,

    #[serde(default)]
    pub downloads: u64,
}

/// One discovered media descriptor. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Unique identity
    pub id: ItemId,

    /// Remote locator for the payload
    pub locator: String,

    /// When this process first saw the item
    pub discovered_at: DateTime<Utc>,

    /// Pass-through engagement data
    #[serde(default)]
    pub metadata: ItemMetadata,
}

impl Item {
    /// Create an item discovered now, with empty metadata
    pub fn new(id: impl Into<ItemId>, locator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            locator: locator.into(),
            discovered_at: Utc::now(),
            metadata: ItemMetadata::default(),
        }
    }

    /// Attach feed metadata
    pub fn with_metadata(mut self, metadata: ItemMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Item as it appears on the wire from the remote feed
#[derive(Debug, Clone, Deserialize)]
pub struct FeedRecord {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "videoUrl")]
    pub video_url: String,

    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub views: u64,

    #[serde(default)]
    pub downloads: u64,
}

impl FeedRecord {
    /// Convert into an [`Item`], stamping the discovery time now
    pub fn into_item(self) -> Item {
        Item::new(self.id, self.video_url).with_metadata(ItemMetadata {
            created_at: self.created_at,
            views: self.views,
            downloads: self.downloads,
        })
    }
}
