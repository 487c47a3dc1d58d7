//! Notifications published by the prefetch pipeline.
//!
//! The rendering side subscribes to these to learn when the item it is
//! waiting on becomes playable.

use serde::{Deserialize, Serialize};

use super::item::ItemId;

/// Event emitted whenever handle residency changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A playable handle was created for an item
    HandleReady {
        id: ItemId,

        /// True when the item is the one at the current position
        current: bool,
    },

    /// Fetching or caching an item failed; it stays unresident until retried
    PrefetchFailed { id: ItemId, reason: String },

    /// A handle was revoked because its item left the window
    Released { id: ItemId },
}

impl PipelineEvent {
    /// The item this event concerns
    pub fn id(&self) -> &ItemId {
        match self {
            Self::HandleReady { id, .. } | Self::PrefetchFailed { id, .. } | Self::Released { id } => id,
        }
    }

    /// Whether this event makes the current item playable
    pub fn is_current_ready(&self) -> bool {
        matches!(self, Self::HandleReady { current: true, .. })
    }
}
