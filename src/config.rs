//! Configuration for reelwindow.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (REELWINDOW_HOME, REELWINDOW_FEED_URL, REELWINDOW_WINDOW)
//! 2. Config file (.reelwindow/config.yaml)
//! 3. Defaults (~/.reelwindow)
//!
//! Config file discovery:
//! - Searches current directory and parents for .reelwindow/config.yaml
//! - `paths.home` is relative to the .reelwindow/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::DEFAULT_CAPACITY;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".reelwindow";
const CONFIG_FILE: &str = "config.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub window: Option<WindowConfig>,
    #[serde(default)]
    pub feed: Option<FeedConfig>,
    #[serde(default)]
    pub fetch: Option<FetchConfig>,
    #[serde(default)]
    pub player: Option<PlayerConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .reelwindow/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub url: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayerConfig {
    pub dwell_secs: Option<u64>,
}

/// Discovery feed settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSettings {
    pub url: Option<String>,
    pub poll_interval_secs: u64,
    pub limit: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: None,
            poll_interval_secs: 15,
            limit: DEFAULT_CAPACITY,
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// State directory (content store lives here)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Maximum items kept in the window
    pub window_capacity: usize,
    pub feed: FeedSettings,
    /// Per-request timeout for payload and feed downloads
    pub fetch_timeout_secs: u64,
    /// How long the headless player shows each item
    pub dwell_secs: u64,
}

impl ResolvedConfig {
    /// Directory the content store opens; the database sits directly in `home`
    pub fn store_dir(&self) -> &Path {
        &self.home
    }
}

/// Values taken from the environment
#[derive(Debug, Clone, Default)]
struct EnvOverrides {
    home: Option<String>,
    feed_url: Option<String>,
    window: Option<String>,
}

impl EnvOverrides {
    fn from_env() -> Self {
        Self {
            home: std::env::var("REELWINDOW_HOME").ok(),
            feed_url: std::env::var("REELWINDOW_FEED_URL").ok(),
            window: std::env::var("REELWINDOW_WINDOW").ok(),
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge defaults, an optional config file and environment overrides
fn resolve(
    default_home: PathBuf,
    file: Option<(PathBuf, ConfigFile)>,
    env: EnvOverrides,
) -> Result<ResolvedConfig> {
    let (config_file, config) = match file {
        Some((path, config)) => (Some(path), Some(config)),
        None => (None, None),
    };

    let home = if let Some(env_home) = env.home {
        PathBuf::from(env_home)
    } else if let (Some(path), Some(home)) = (
        config_file.as_ref(),
        config.as_ref().and_then(|c| c.paths.home.as_ref()),
    ) {
        let config_dir = path.parent().unwrap_or(Path::new("."));
        resolve_path(config_dir, home)
    } else {
        default_home
    };

    let window_capacity = match env.window {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .with_context(|| format!("Invalid REELWINDOW_WINDOW value: {}", raw))?,
        None => config
            .as_ref()
            .and_then(|c| c.window.as_ref())
            .and_then(|w| w.capacity)
            .unwrap_or(DEFAULT_CAPACITY),
    };

    let feed_config = config.as_ref().and_then(|c| c.feed.as_ref());
    let defaults = FeedSettings::default();
    let feed = FeedSettings {
        url: env
            .feed_url
            .or_else(|| feed_config.and_then(|f| f.url.clone())),
        poll_interval_secs: feed_config
            .and_then(|f| f.poll_interval_secs)
            .unwrap_or(defaults.poll_interval_secs),
        limit: feed_config
            .and_then(|f| f.limit)
            .unwrap_or(window_capacity),
    };

    let fetch_timeout_secs = config
        .as_ref()
        .and_then(|c| c.fetch.as_ref())
        .and_then(|f| f.timeout_secs)
        .unwrap_or(60);

    let dwell_secs = config
        .as_ref()
        .and_then(|c| c.player.as_ref())
        .and_then(|p| p.dwell_secs)
        .unwrap_or(8);

    Ok(ResolvedConfig {
        home,
        config_file,
        window_capacity,
        feed,
        fetch_timeout_secs,
        dwell_secs,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let file = match find_config_file() {
        Some(path) => {
            let config = load_config_file(&path)?;
            Some((path, config))
        }
        None => None,
    };

    resolve(default_home, file, EnvOverrides::from_env())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the state directory
pub fn home_dir() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Directory holding the content store database (`<home>/content.sqlite`)
pub fn store_dir() -> Result<PathBuf> {
    Ok(config()?.store_dir().to_path_buf())
}
