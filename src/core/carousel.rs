//! The consumer-facing carousel.
//!
//! Owns the window behind a single async mutex, so appends from discovery
//! and position changes from the player are applied one at a time. After
//! each mutation the prefetch pipeline is updated while the lock is still
//! held, so it sees snapshots in the order the mutations happened.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{info, instrument};

use crate::adapters::PayloadSource;
use crate::domain::{InteractionBoard, Interactions, Item, ItemId, PipelineEvent};

use super::content_store::ContentStore;
use super::fetcher::Fetcher;
use super::prefetch::PrefetchPipeline;
use super::registry::{ResourceHandle, ResourceHandleRegistry};
use super::window::{AppendOutcome, WindowError, WindowQueue, WindowSnapshot};

/// Sliding-window carousel with prefetching and a persistent cache
pub struct Carousel {
    window: Mutex<WindowQueue>,
    pipeline: PrefetchPipeline,
    store: ContentStore,
    interactions: InteractionBoard,
}

impl Carousel {
    /// Build a carousel. Fails if `capacity` is zero.
    pub fn new(
        capacity: usize,
        store: ContentStore,
        source: Arc<dyn PayloadSource>,
    ) -> Result<Self, WindowError> {
        let window = WindowQueue::new(capacity)?;
        let fetcher = Arc::new(Fetcher::new(store.clone(), source));
        let registry = Arc::new(ResourceHandleRegistry::new());

        Ok(Self {
            window: Mutex::new(window),
            pipeline: PrefetchPipeline::new(fetcher, registry),
            store,
            interactions: InteractionBoard::new(),
        })
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    pub fn pipeline(&self) -> &PrefetchPipeline {
        &self.pipeline
    }

    /// Append discovered items. Also re-runs prefetching for the current
    /// targets, which is how failed fetches get retried.
    #[instrument(skip(self, items), fields(incoming = items.len()))]
    pub async fn ingest(&self, items: Vec<Item>) -> AppendOutcome {
        let mut window = self.window.lock().await;
        let outcome = window.append(items);
        self.pipeline.sync(&window.snapshot(), &outcome.evicted);

        if outcome.changed() {
            info!(
                added = outcome.appended.len(),
                removed = outcome.evicted.len(),
                total = window.len(),
                position = outcome.position,
                "Window updated"
            );
        }
        self.interactions.forget(&outcome.evicted);

        outcome
    }

    /// The current item finished playing
    pub async fn advance(&self) -> usize {
        let mut window = self.window.lock().await;
        let position = window.advance();
        self.pipeline.sync(&window.snapshot(), &[]);
        position
    }

    /// Resynchronize after external navigation; out-of-range values are clamped
    pub async fn set_position(&self, position: i64) -> usize {
        let mut window = self.window.lock().await;
        let position = window.set_position(position);
        self.pipeline.sync(&window.snapshot(), &[]);
        position
    }

    pub async fn snapshot(&self) -> WindowSnapshot {
        self.window.lock().await.snapshot()
    }

    /// Identity at the current position
    pub async fn current_id(&self) -> Option<ItemId> {
        self.window.lock().await.current().map(|item| item.id.clone())
    }

    /// Handle for the current item; `None` means not ready yet
    pub async fn current_handle(&self) -> Option<ResourceHandle> {
        let id = self.current_id().await?;
        self.pipeline.handle(&id)
    }

    /// Decorative counters for the current item
    pub async fn current_interactions(&self) -> Option<(ItemId, Interactions)> {
        let id = self.current_id().await?;
        let counters = self.interactions.for_item(&id);
        Some((id, counters))
    }

    /// Subscribe to handle-ready / failure / release events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.pipeline.subscribe()
    }

    /// Wait until every prefetch and purge task has finished
    pub async fn settle(&self) {
        self.pipeline.settle().await;
    }

    /// Cancel outstanding work and revoke all handles
    pub async fn shutdown(&self) {
        let _window = self.window.lock().await;
        self.pipeline.shutdown().await;
    }
}
