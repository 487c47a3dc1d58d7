//! reelwindow - Sliding-window media carousel
//!
//! Plays an unbounded, growing stream of media items while keeping only a
//! bounded window of them in memory and on disk.
//!
//! # Architecture
//!
//! - New items are appended to a bounded window; when it overflows, items
//!   already watched are evicted first, then the newest unwatched ones
//! - Payloads are cached in SQLite by item identity and downloaded at most
//!   once, even under concurrent requests
//! - The current and next items (and anything newly discovered) are
//!   prefetched in the background into live, revocable handles
//!
//! # Modules
//!
//! - `adapters`: Remote payload sources and discovery feeds (HTTP)
//! - `core`: Window, cache, fetcher, handle registry, prefetch pipeline
//! - `domain`: Data structures (Item, PipelineEvent, Interactions)
//! - `ingest`: Discovery poller
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Follow a feed and play items headlessly
//! reelwindow play --feed http://localhost:3000/api/videos
//!
//! # Inspect the cache
//! reelwindow cache stats
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;

// Re-export main types at crate root for convenience
pub use crate::core::{Carousel, ContentStore, ResourceHandle, WindowQueue};
pub use domain::{Item, ItemId, PipelineEvent};
