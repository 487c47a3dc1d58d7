//! Carousel Integration Tests
//!
//! Prefetch residency, retries, eviction cleanup and shutdown, driven
//! through the public carousel API with scripted sources.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use reelwindow::adapters::{DiscoveryFeed, PayloadSource};
use reelwindow::core::{Carousel, ContentStore, HandleError};
use reelwindow::domain::{Item, ItemId, PipelineEvent};
use reelwindow::ingest::{PollResult, Poller, PollerConfig};
use rusqlite::Connection;
use tempfile::TempDir;
use tokio::sync::{broadcast, Semaphore};

/// Source that fails a configured number of times per locator, optionally
/// holding every download until opened
struct ScriptedSource {
    failures: Mutex<HashMap<String, usize>>,
    calls: AtomicUsize,
    gate: Option<Semaphore>,
}

impl ScriptedSource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            gate: None,
        })
    }

    fn gated() -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            gate: Some(Semaphore::new(0)),
        })
    }

    fn fail_times(&self, locator: &str, times: usize) {
        self.failures.lock().unwrap().insert(locator.to_string(), times);
    }

    fn open(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PayloadSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn download(&self, locator: &str) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await?;
        }

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(locator) {
                if *left > 0 {
                    *left -= 1;
                    anyhow::bail!("connection reset fetching {}", locator);
                }
            }
        }

        Ok(Bytes::from(format!("video:{}", locator)))
    }
}

fn item(id: &str) -> Item {
    Item::new(id, locator(id))
}

fn locator(id: &str) -> String {
    format!("https://cdn.test/{}.mp4", id)
}

fn create_carousel(capacity: usize, source: Arc<ScriptedSource>) -> (Arc<Carousel>, TempDir) {
    let temp = TempDir::new().unwrap();
    let store = ContentStore::open(temp.path()).unwrap();
    (Arc::new(Carousel::new(capacity, store, source).unwrap()), temp)
}

fn drain(events: &mut broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn test_zero_capacity_rejected() {
    let temp = TempDir::new().unwrap();
    let store = ContentStore::open(temp.path()).unwrap();
    assert!(Carousel::new(0, store, ScriptedSource::new()).is_err());
}

#[tokio::test]
async fn test_ingest_makes_items_resident() {
    let source = ScriptedSource::new();
    let (carousel, _temp) = create_carousel(10, source.clone());
    let mut events = carousel.subscribe();

    carousel.ingest(vec![item("a"), item("b"), item("c")]).await;
    carousel.settle().await;

    let registry = carousel.pipeline().registry();
    assert_eq!(
        registry.live_ids(),
        vec![ItemId::from("a"), ItemId::from("b"), ItemId::from("c")]
    );

    let handle = carousel.current_handle().await.unwrap();
    assert_eq!(handle.id().as_str(), "a");
    assert_eq!(handle.read().unwrap(), Bytes::from(format!("video:{}", locator("a"))));
    assert_eq!(carousel.store().ids().await.unwrap().len(), 3);

    let ready: Vec<PipelineEvent> = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, PipelineEvent::HandleReady { .. }))
        .collect();
    assert_eq!(ready.len(), 3);
    assert_eq!(ready.iter().filter(|e| e.is_current_ready()).count(), 1);
    assert!(ready
        .iter()
        .any(|e| e.is_current_ready() && e.id().as_str() == "a"));
}

#[tokio::test]
async fn test_current_handle_absent_until_ready() {
    let source = ScriptedSource::gated();
    let (carousel, _temp) = create_carousel(5, source.clone());

    carousel.ingest(vec![item("a")]).await;
    assert_eq!(carousel.current_id().await, Some(ItemId::from("a")));
    assert!(carousel.current_handle().await.is_none());

    source.open();
    carousel.settle().await;

    assert!(carousel.current_handle().await.is_some());
}

#[tokio::test]
async fn test_failed_prefetch_retried_on_next_pass() {
    let source = ScriptedSource::new();
    source.fail_times(&locator("x"), 1);
    let (carousel, _temp) = create_carousel(5, source.clone());
    let mut events = carousel.subscribe();

    carousel.ingest(vec![item("x")]).await;
    carousel.settle().await;

    assert!(carousel.current_handle().await.is_none());
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, PipelineEvent::PrefetchFailed { id, .. } if id.as_str() == "x")));

    // An empty discovery pass is still a prefetch pass
    carousel.ingest(Vec::new()).await;
    carousel.settle().await;

    let handle = carousel.current_handle().await.unwrap();
    assert_eq!(handle.read().unwrap(), Bytes::from(format!("video:{}", locator("x"))));
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn test_advance_retries_next_item() {
    let source = ScriptedSource::new();
    source.fail_times(&locator("b"), 1);
    let (carousel, _temp) = create_carousel(5, source.clone());

    carousel.ingest(vec![item("a"), item("b"), item("c")]).await;
    carousel.settle().await;
    assert!(carousel.pipeline().handle(&ItemId::from("b")).is_none());

    assert_eq!(carousel.advance().await, 1);
    carousel.settle().await;

    assert_eq!(carousel.current_handle().await.unwrap().id().as_str(), "b");
}

#[tokio::test]
async fn test_resident_items_not_downloaded_again() {
    let source = ScriptedSource::new();
    let (carousel, _temp) = create_carousel(5, source.clone());

    carousel.ingest(vec![item("a"), item("b")]).await;
    carousel.settle().await;
    for _ in 0..4 {
        carousel.advance().await;
        carousel.settle().await;
    }
    carousel.ingest(vec![item("a"), item("b")]).await;
    carousel.settle().await;

    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn test_eviction_releases_handle_and_cache() {
    let source = ScriptedSource::new();
    let (carousel, _temp) = create_carousel(2, source.clone());
    let mut events = carousel.subscribe();

    carousel.ingest(vec![item("a"), item("b")]).await;
    carousel.settle().await;
    let handle_a = carousel.current_handle().await.unwrap();

    carousel.set_position(1).await;
    let outcome = carousel.ingest(vec![item("c")]).await;
    carousel.settle().await;

    assert_eq!(outcome.evicted, vec![ItemId::from("a")]);
    assert_eq!(outcome.position, 0);

    let a = ItemId::from("a");
    assert!(carousel.pipeline().handle(&a).is_none());
    assert!(carousel.store().get(&a).await.unwrap().is_none());
    assert!(handle_a.is_revoked());
    assert_eq!(handle_a.read().unwrap_err(), HandleError::Revoked(a.clone()));

    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, PipelineEvent::Released { id } if *id == a)));

    let live = carousel.pipeline().registry().live_ids();
    assert_eq!(live, vec![ItemId::from("b"), ItemId::from("c")]);
    assert_eq!(carousel.current_id().await, Some(ItemId::from("b")));
}

#[tokio::test]
async fn test_evicted_during_fetch_leaves_nothing_behind() {
    let source = ScriptedSource::gated();
    let (carousel, _temp) = create_carousel(2, source.clone());

    carousel.ingest(vec![item("a"), item("b")]).await;
    carousel.set_position(1).await;
    carousel.ingest(vec![item("c")]).await;

    source.open();
    carousel.settle().await;

    let a = ItemId::from("a");
    assert!(carousel.pipeline().handle(&a).is_none());
    assert!(carousel.store().get(&a).await.unwrap().is_none());
    assert_eq!(
        carousel.pipeline().registry().live_ids(),
        vec![ItemId::from("b"), ItemId::from("c")]
    );
}

#[tokio::test]
async fn test_failed_purge_retried_on_next_sync() {
    let (carousel, _temp) = create_carousel(2, ScriptedSource::new());
    carousel.ingest(vec![item("a"), item("b")]).await;
    carousel.settle().await;

    let conn = Connection::open(carousel.store().db_path()).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER keep_a BEFORE DELETE ON entries WHEN OLD.id = 'a'
         BEGIN SELECT RAISE(ABORT, 'row locked'); END;",
    )
    .unwrap();

    carousel.set_position(1).await;
    let outcome = carousel.ingest(vec![item("c")]).await;
    carousel.settle().await;

    let a = ItemId::from("a");
    assert_eq!(outcome.evicted, vec![a.clone()]);
    assert!(carousel.store().get(&a).await.unwrap().is_some());

    // Once deletes work again, any later window change reclaims the row
    conn.execute_batch("DROP TRIGGER keep_a;").unwrap();
    carousel.advance().await;
    carousel.settle().await;

    assert!(carousel.store().get(&a).await.unwrap().is_none());
    let mut cached = carousel.store().ids().await.unwrap();
    cached.sort();
    assert_eq!(cached, vec![ItemId::from("b"), ItemId::from("c")]);
}

#[tokio::test]
async fn test_reappended_item_prefetched_after_stale_task() {
    let source = ScriptedSource::gated();
    source.fail_times(&locator("x"), 1);
    let (carousel, _temp) = create_carousel(3, source.clone());

    carousel.ingest(vec![item("x"), item("c"), item("d")]).await;
    carousel.set_position(1).await;

    // x is evicted and comes back while its first fetch is still running
    carousel.ingest(vec![item("e")]).await;
    carousel.set_position(1).await;
    let outcome = carousel.ingest(vec![item("x")]).await;
    assert_eq!(outcome.appended, vec![ItemId::from("x")]);
    assert_eq!(
        carousel.snapshot().await.ids(),
        vec![ItemId::from("d"), ItemId::from("e"), ItemId::from("x")]
    );

    source.open();
    carousel.settle().await;
    let x = ItemId::from("x");
    assert!(carousel.pipeline().handle(&x).is_none());

    // x is neither current nor next, but was never warmed since re-entry
    carousel.set_position(0).await;
    carousel.settle().await;

    assert!(carousel.pipeline().handle(&x).is_some());
    assert!(carousel.store().get(&x).await.unwrap().is_some());
}

#[tokio::test]
async fn test_sync_during_settle_does_not_duplicate_prefetch() {
    let source = ScriptedSource::gated();
    let (carousel, _temp) = create_carousel(5, source.clone());
    let mut events = carousel.subscribe();

    carousel.ingest(vec![item("a")]).await;
    let settling = tokio::spawn({
        let carousel = carousel.clone();
        async move { carousel.settle().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    carousel.ingest(Vec::new()).await;
    source.open();
    tokio::time::timeout(Duration::from_secs(5), settling)
        .await
        .unwrap()
        .unwrap();
    carousel.settle().await;

    let ready = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, PipelineEvent::HandleReady { id, .. } if id.as_str() == "a"))
        .count();
    assert_eq!(ready, 1);
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_out_of_range_position_clamped() {
    let (carousel, _temp) = create_carousel(5, ScriptedSource::new());
    carousel.ingest(vec![item("a"), item("b"), item("c")]).await;

    assert_eq!(carousel.set_position(99).await, 2);
    assert_eq!(carousel.set_position(-4).await, 0);
    carousel.settle().await;
}

#[tokio::test]
async fn test_shutdown_revokes_everything() {
    let source = ScriptedSource::new();
    let (carousel, _temp) = create_carousel(5, source.clone());

    carousel.ingest(vec![item("a"), item("b")]).await;
    carousel.settle().await;
    let handle = carousel.current_handle().await.unwrap();

    carousel.shutdown().await;

    assert!(carousel.pipeline().registry().is_empty());
    assert!(handle.is_revoked());
    assert_eq!(carousel.pipeline().pending_tasks(), 0);

    // Payloads stay cached for the next session
    assert_eq!(carousel.store().ids().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_shutdown_cancels_pending_fetches() {
    let source = ScriptedSource::gated();
    let (carousel, _temp) = create_carousel(5, source.clone());

    carousel.ingest(vec![item("a"), item("b")]).await;
    tokio::time::timeout(Duration::from_secs(5), carousel.shutdown())
        .await
        .unwrap();

    assert!(carousel.pipeline().registry().is_empty());
    assert_eq!(carousel.pipeline().fetcher().in_flight_count(), 0);
}

#[tokio::test]
async fn test_interactions_stable_for_current_item() {
    let (carousel, _temp) = create_carousel(5, ScriptedSource::new());
    assert!(carousel.current_interactions().await.is_none());

    carousel.ingest(vec![item("a")]).await;
    let (id, first) = carousel.current_interactions().await.unwrap();
    let (_, again) = carousel.current_interactions().await.unwrap();

    assert_eq!(id.as_str(), "a");
    assert_eq!(first, again);
    carousel.settle().await;
}

struct StaticFeed {
    items: Vec<Item>,
}

#[async_trait]
impl DiscoveryFeed for StaticFeed {
    fn name(&self) -> &str {
        "static"
    }

    async fn poll(&self) -> Result<Vec<Item>> {
        Ok(self.items.clone())
    }
}

#[tokio::test]
async fn test_poll_once_ingests_feed() {
    let (carousel, _temp) = create_carousel(5, ScriptedSource::new());
    let feed = Arc::new(StaticFeed {
        items: vec![item("a"), item("b"), item("c")],
    });
    let poller = Poller::new(PollerConfig::default(), feed, carousel.clone());

    let first = poller.poll_once().await.unwrap();
    assert_eq!(
        first,
        PollResult {
            reported: 3,
            appended: 3,
            evicted: 0
        }
    );

    let second = poller.poll_once().await.unwrap();
    assert_eq!(second.appended, 0);
    assert_eq!(carousel.snapshot().await.len(), 3);
    carousel.settle().await;
}

#[tokio::test]
async fn test_spawned_poller_stops_cleanly() {
    let (carousel, _temp) = create_carousel(5, ScriptedSource::new());
    let feed = Arc::new(StaticFeed {
        items: vec![item("a")],
    });
    let handle = Poller::new(PollerConfig { interval_secs: 1 }, feed, carousel.clone()).spawn();

    // First tick fires immediately
    tokio::time::timeout(Duration::from_secs(5), async {
        while carousel.snapshot().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    handle.stop().await.unwrap();
    carousel.shutdown().await;
}
