//! Discovery ingestion.
//!
//! ```text
//! DiscoveryFeed → Poller → Carousel::ingest → WindowQueue + PrefetchPipeline
//! ```

pub mod poller;

// Re-export key types
pub use poller::{PollHandle, PollResult, Poller, PollerConfig};
