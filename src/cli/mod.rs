//! Command-line interface for reelwindow.
//!
//! Provides a headless player that follows a discovery feed, plus
//! maintenance commands for the content cache.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;

use crate::adapters::{HttpFeed, HttpSource};
use crate::core::{Carousel, ContentStore, ResourceHandle};
use crate::domain::PipelineEvent;
use crate::ingest::{Poller, PollerConfig};

/// reelwindow - Sliding-window media carousel with a persistent cache
#[derive(Parser, Debug)]
#[command(name = "reelwindow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Follow a feed and play items headlessly until Ctrl-C
    Play {
        /// Feed URL (overrides config and REELWINDOW_FEED_URL)
        #[arg(short, long)]
        feed: Option<String>,

        /// Seconds to show each item
        #[arg(short, long)]
        dwell: Option<u64>,
    },

    /// Inspect or maintain the content cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// List cached item identities
    List,

    /// Show entry count and size
    Stats,

    /// Remove every cached payload
    Clear,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Play { feed, dwell } => play(feed, dwell).await,
            Commands::Cache { command } => execute_cache(command).await,
            Commands::Config => show_config(),
        }
    }
}

/// Run the poller and the headless player
async fn play(feed_url: Option<String>, dwell: Option<u64>) -> Result<()> {
    let config = crate::config::config()?;

    let url = feed_url
        .or_else(|| config.feed.url.clone())
        .context("No feed URL. Use --feed or set REELWINDOW_FEED_URL")?;
    let timeout = Duration::from_secs(config.fetch_timeout_secs);

    let store = ContentStore::open_default()?;
    let source = Arc::new(HttpSource::new(timeout)?);
    let carousel = Arc::new(
        Carousel::new(config.window_capacity, store, source).context("Invalid window configuration")?,
    );

    let feed = Arc::new(HttpFeed::new(url, config.feed.limit, timeout)?);
    let poller = Poller::new(
        PollerConfig {
            interval_secs: config.feed.poll_interval_secs,
        },
        feed,
        Arc::clone(&carousel),
    )
    .spawn();

    let dwell = Duration::from_secs(dwell.unwrap_or(config.dwell_secs).max(1));
    let mut events = carousel.subscribe();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                eprintln!("\n[Stopping]");
                break;
            }
            _ = play_current(&carousel, &mut events, dwell) => {}
        }
    }

    poller.stop().await?;
    carousel.shutdown().await;
    Ok(())
}

/// Wait for the current item to become playable, show it, then advance
async fn play_current(
    carousel: &Carousel,
    events: &mut broadcast::Receiver<PipelineEvent>,
    dwell: Duration,
) {
    let handle = wait_for_current(carousel, events).await;
    let size = handle.read().map(|bytes| bytes.len()).unwrap_or(0);
    let position = carousel.snapshot().await.position;

    match carousel.current_interactions().await {
        Some((_, counters)) => tracing::info!(
            id = %handle.id(),
            position,
            locator = handle.locator(),
            size,
            likes = counters.likes,
            comments = counters.comments,
            "Now playing"
        ),
        None => tracing::info!(id = %handle.id(), position, size, "Now playing"),
    }

    tokio::time::sleep(dwell).await;
    carousel.advance().await;
}

async fn wait_for_current(
    carousel: &Carousel,
    events: &mut broadcast::Receiver<PipelineEvent>,
) -> ResourceHandle {
    let mut announced = false;
    loop {
        if let Some(handle) = carousel.current_handle().await {
            return handle;
        }
        if !announced {
            tracing::info!("Waiting for current item...");
            announced = true;
        }
        // Recheck on any event, or periodically in case we lagged
        let _ = tokio::time::timeout(Duration::from_millis(500), events.recv()).await;
    }
}

async fn execute_cache(command: CacheCommands) -> Result<()> {
    let store = ContentStore::open_default()?;

    match command {
        CacheCommands::List => {
            let ids = store.ids().await?;
            if ids.is_empty() {
                println!("Cache is empty.");
            }
            for id in ids {
                println!("{}", id);
            }
        }
        CacheCommands::Stats => {
            let stats = store.stats().await?;
            println!("Store: {}", store.db_path().display());
            println!("Entries: {}", stats.entries);
            println!(
                "Size: {:.2} MB",
                stats.payload_bytes as f64 / 1024.0 / 1024.0
            );
        }
        CacheCommands::Clear => {
            let removed = store.clear().await?;
            println!("Removed {} cached payloads.", removed);
        }
    }

    Ok(())
}

fn show_config() -> Result<()> {
    let config = crate::config::config()?;
    let yaml = serde_yaml::to_string(config).context("Failed to render configuration")?;
    print!("{}", yaml);
    Ok(())
}
