//! Domain types for reelwindow.
//!
//! This module contains the core data structures:
//! - Item: Discovered media descriptors and their identities
//! - Events: Residency notifications from the prefetch pipeline
//! - Interactions: Decorative per-item counters

pub mod events;
pub mod interactions;
pub mod item;

// Re-export commonly used types
pub use events::PipelineEvent;
pub use interactions::{InteractionBoard, Interactions};
pub use item::{FeedRecord, Item, ItemId, ItemMetadata};
