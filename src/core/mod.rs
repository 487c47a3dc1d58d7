//! Core window and residency logic.
//!
//! This module contains:
//! - WindowQueue: Bounded window with position-driven eviction
//! - ContentStore: Persistent payload cache
//! - Fetcher: Cache-first, single-flight payload resolution
//! - ResourceHandleRegistry: Live handles for resident items
//! - PrefetchPipeline: Keeps current and upcoming items resident
//! - Carousel: Serialized front door tying it all together

pub mod carousel;
pub mod content_store;
pub mod fetcher;
pub mod prefetch;
pub mod registry;
pub mod window;

// Re-export commonly used types
pub use carousel::Carousel;
pub use content_store::{CacheEntry, ContentStore, DeleteReport, StoreError, StoreStats, STORE_VERSION};
pub use fetcher::{FetchError, Fetcher};
pub use prefetch::PrefetchPipeline;
pub use registry::{HandleError, ResourceHandle, ResourceHandleRegistry};
pub use window::{AppendOutcome, WindowError, WindowQueue, WindowSnapshot, DEFAULT_CAPACITY};
