//! Cache-first payload fetching with single-flight deduplication.
//!
//! The first caller to miss the cache for an identity becomes the leader and
//! performs the download; concurrent callers for the same identity subscribe
//! to the leader's result instead of downloading again. The identity leaves
//! the in-flight map when the leader finishes, fails, or is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::adapters::PayloadSource;
use crate::domain::{Item, ItemId};

use super::content_store::ContentStore;

/// Fetch failures, shared verbatim with every waiter on the same flight
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Fetch of {id} failed: {reason}")]
    Network { id: ItemId, reason: String },

    #[error("Fetch of {0} was abandoned before completing")]
    Abandoned(ItemId),
}

impl FetchError {
    pub fn id(&self) -> &ItemId {
        match self {
            Self::Network { id, .. } | Self::Abandoned(id) => id,
        }
    }
}

type FlightResult = Option<Result<Bytes, FetchError>>;

enum Flight<'a> {
    Leader(FlightGuard<'a>),
    Follower(watch::Receiver<FlightResult>),
}

/// Held by the leader; clears the in-flight entry when dropped
struct FlightGuard<'a> {
    fetcher: &'a Fetcher,
    id: ItemId,
    tx: watch::Sender<FlightResult>,
}

impl FlightGuard<'_> {
    fn finish(self, result: Result<Bytes, FetchError>) {
        self.tx.send_replace(Some(result));
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.fetcher.in_flight().remove(&self.id);
    }
}

/// Resolves items to payload bytes through the content store
pub struct Fetcher {
    store: ContentStore,
    source: Arc<dyn PayloadSource>,
    in_flight: Mutex<HashMap<ItemId, watch::Receiver<FlightResult>>>,
    downloads: AtomicU64,
}

impl Fetcher {
    pub fn new(store: ContentStore, source: Arc<dyn PayloadSource>) -> Self {
        Self {
            store,
            source,
            in_flight: Mutex::new(HashMap::new()),
            downloads: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<ItemId, watch::Receiver<FlightResult>>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of identities currently being downloaded
    pub fn in_flight_count(&self) -> usize {
        self.in_flight().len()
    }

    /// Number of successful network downloads so far
    pub fn download_count(&self) -> u64 {
        self.downloads.load(Ordering::Relaxed)
    }

    fn begin(&self, id: &ItemId) -> Flight<'_> {
        let mut flights = self.in_flight();
        if let Some(rx) = flights.get(id) {
            return Flight::Follower(rx.clone());
        }

        let (tx, rx) = watch::channel(None);
        flights.insert(id.clone(), rx);
        Flight::Leader(FlightGuard {
            fetcher: self,
            id: id.clone(),
            tx,
        })
    }

    /// Payload for `item`: from the cache if present, otherwise downloaded
    /// once and written to the cache before returning
    pub async fn resolve(&self, item: &Item) -> Result<Bytes, FetchError> {
        if let Some(payload) = self.cached(&item.id).await {
            debug!(id = %item.id, "Cache hit");
            return Ok(payload);
        }
        debug!(id = %item.id, "Cache miss");

        match self.begin(&item.id) {
            Flight::Follower(mut rx) => {
                debug!(id = %item.id, "Joining in-flight fetch");
                match rx.wait_for(|result| result.is_some()).await {
                    Ok(result) => result
                        .clone()
                        .unwrap_or_else(|| Err(FetchError::Abandoned(item.id.clone()))),
                    Err(_) => Err(FetchError::Abandoned(item.id.clone())),
                }
            }
            Flight::Leader(guard) => {
                // A flight that ended between our miss and our claim has already cached
                if let Some(payload) = self.cached(&item.id).await {
                    guard.finish(Ok(payload.clone()));
                    return Ok(payload);
                }

                let result = self.download(item).await;
                guard.finish(result.clone());
                result
            }
        }
    }

    async fn cached(&self, id: &ItemId) -> Option<Bytes> {
        match self.store.get(id).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%id, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn download(&self, item: &Item) -> Result<Bytes, FetchError> {
        let started = Instant::now();
        let payload = self
            .source
            .download(&item.locator)
            .await
            .map_err(|e| FetchError::Network {
                id: item.id.clone(),
                reason: format!("{:#}", e),
            })?;

        self.downloads.fetch_add(1, Ordering::Relaxed);
        info!(
            id = %item.id,
            source = self.source.name(),
            size = payload.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Downloaded payload"
        );

        if let Err(e) = self.store.put(&item.id, payload.clone()).await {
            warn!(id = %item.id, error = %e, "Failed to cache payload");
        }

        Ok(payload)
    }
}
