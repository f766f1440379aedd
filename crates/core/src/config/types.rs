use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::cluster::ClusterConfig;
use crate::extractor::MetaProgramConfig;
use crate::sink::SinkConfig;
use crate::storage::Driver;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub producers: Vec<SinkConfig>,
    pub db: DbConfig,
    /// Optional: without it the daemon runs standalone and crawls
    /// unconditionally instead of waiting for master election.
    #[serde(default)]
    pub cluster: Option<ClusterConfig>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Append-mode log file; stderr when unset.
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: None,
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Crawl loop and enrichment configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlerConfig {
    /// Base URL prepended to every relative upstream path.
    pub baseurl: String,
    /// Page path template with a single `%d` offset placeholder.
    pub contexturl: String,
    /// Meta extractor iteration budget.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Meta extractor stack depth budget.
    #[serde(default = "default_depth")]
    pub depth: usize,
    /// Seconds to sleep between windows; values below 5 are raised to 5.
    #[serde(default = "default_delay")]
    pub delay: u64,
    /// Number of offsets probed per window.
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    /// Every multiple of this offset triggers a milestone announcement.
    #[serde(default = "default_anniversary")]
    pub anniversary: u64,
    /// One action program per extracted meta field.
    #[serde(default)]
    pub metaactions: Vec<MetaProgramConfig>,
    /// Grace seconds before the single extraction retry.
    #[serde(default = "default_metaretry")]
    pub metaretry: u64,
    /// Meta field holding the poster URL.
    #[serde(default)]
    pub imagemetafield: String,
    /// Maximum poster edge in pixels; 0 keeps the original bytes.
    #[serde(default)]
    pub imagethumb: u32,
}

fn default_limit() -> usize {
    10_000
}

fn default_depth() -> usize {
    64
}

fn default_delay() -> u64 {
    30
}

fn default_threshold() -> u32 {
    10
}

fn default_anniversary() -> u64 {
    1000
}

fn default_metaretry() -> u64 {
    60
}

/// Storage backend selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DbConfig {
    pub driver: Driver,
    /// Driver-dependent parameters, e.g. `dbfile` for sqlite or
    /// `address`/`password`/`db` for redis.
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}
