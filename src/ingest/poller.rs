//! Discovery poller.
//!
//! Polls a [`DiscoveryFeed`] on a fixed cadence and hands whatever it
//! reports to the carousel. Feed errors are logged and the next tick tries
//! again; the carousel deduplicates, so re-reported items are harmless.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::adapters::DiscoveryFeed;
use crate::core::Carousel;

/// Configuration for the poller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Time between polls (seconds)
    pub interval_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self { interval_secs: 15 }
    }
}

/// Counters from a single poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollResult {
    pub reported: usize,
    pub appended: usize,
    pub evicted: usize,
}

/// Feed poller bound to a carousel
pub struct Poller {
    config: PollerConfig,
    feed: Arc<dyn DiscoveryFeed>,
    carousel: Arc<Carousel>,
}

impl Poller {
    pub fn new(config: PollerConfig, feed: Arc<dyn DiscoveryFeed>, carousel: Arc<Carousel>) -> Self {
        Self {
            config,
            feed,
            carousel,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Poll once and ingest the result
    pub async fn poll_once(&self) -> Result<PollResult> {
        let items = self.feed.poll().await?;
        let reported = items.len();
        let outcome = self.carousel.ingest(items).await;

        Ok(PollResult {
            reported,
            appended: outcome.appended.len(),
            evicted: outcome.evicted.len(),
        })
    }

    /// Poll immediately, then once per interval, until stopped
    pub fn spawn(self) -> PollHandle {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            let period = Duration::from_secs(self.config.interval_secs.max(1));
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                feed = self.feed.name(),
                interval_secs = period.as_secs(),
                "Polling discovery feed"
            );

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        tracing::info!("Poller stopping...");
                        break;
                    }
                    _ = ticker.tick() => {
                        match self.poll_once().await {
                            Ok(result) if result.appended > 0 => {
                                tracing::info!(
                                    appended = result.appended,
                                    evicted = result.evicted,
                                    "Discovered new items"
                                );
                            }
                            Ok(_) => tracing::debug!("No new items"),
                            Err(e) => tracing::warn!("Feed poll failed: {:#}", e),
                        }
                    }
                }
            }
        });

        PollHandle { stop_tx, task }
    }
}

/// Handle to control a running poller
pub struct PollHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl PollHandle {
    /// Stop the poller and wait for it to exit
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}
