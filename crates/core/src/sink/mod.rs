//! Downstream consumers of torrent events.
//!
//! Every sink is independent and best-effort: a failure is logged by the
//! announcer worker and never reaches the crawl loop.

mod announcer;
pub mod chat;
pub mod nats;

pub use announcer::Announcer;
pub use chat::ChatSink;
pub use nats::NatsSink;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::storage::{Storage, StorageError};
use crate::torrent::TorrentDescriptor;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink configuration: {0}")]
    Config(String),

    #[error("sink transport: {0}")]
    Transport(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        SinkError::Transport(e.to_string())
    }
}

/// One `producers[]` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-assigned instance id; duplicate ids reuse one instance.
    #[serde(default)]
    pub id: Option<String>,
    /// Path to the sink's own JSON configuration file.
    pub configpath: String,
}

/// A downstream consumer of torrent and milestone events.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Announce a newly discovered (`is_new`) or revised torrent.
    async fn send(&self, is_new: bool, torrent: &TorrentDescriptor) -> Result<(), SinkError>;

    /// Announce an anniversary offset.
    async fn send_milestone(&self, offset: u64) -> Result<(), SinkError>;

    async fn close(&self);
}

/// Build sink instances from configuration.
///
/// Unknown types fail construction; duplicate ids coalesce onto the already
/// built instance so one downstream connection serves all of them.
pub async fn build_sinks(
    configs: &[SinkConfig],
    storage: Arc<dyn Storage>,
) -> Result<Vec<Arc<dyn Sink>>, SinkError> {
    let mut by_id: HashMap<String, Arc<dyn Sink>> = HashMap::new();
    let mut sinks = Vec::with_capacity(configs.len());
    if configs.is_empty() {
        warn!("no producers configured");
    }
    for (i, conf) in configs.iter().enumerate() {
        let id = match &conf.id {
            Some(id) => id.clone(),
            None => {
                warn!(kind = conf.kind, "producer id not set, using the type name");
                conf.kind.clone()
            }
        };
        if let Some(existing) = by_id.get(&id) {
            info!(id, "reusing already initialized producer");
            sinks.push(Arc::clone(existing));
            continue;
        }
        debug!(kind = conf.kind, id, "initializing producer");
        let sink: Arc<dyn Sink> = match conf.kind.as_str() {
            "nats" => Arc::new(NatsSink::from_file(&conf.configpath).await?),
            "telegram" => Arc::new(ChatSink::from_file(&conf.configpath, Arc::clone(&storage)).await?),
            other => {
                return Err(SinkError::Config(format!(
                    "producer #{i}: unknown type `{other}`"
                )))
            }
        };
        by_id.insert(id, Arc::clone(&sink));
        sinks.push(sink);
    }
    Ok(sinks)
}

/// Render a `{field}` placeholder template.
pub fn render_template(template: &str, values: &HashMap<&str, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// Human-readable size with binary suffixes.
pub fn format_file_size(size: u64) -> String {
    const BASE: u64 = 1024;
    const SUFFIXES: &[u8] = b"KMGTPEZY";
    if size < BASE {
        return format!("{size} B");
    }
    let mut divisor = BASE;
    let mut exponent = 0usize;
    let mut n = size / BASE;
    while n >= BASE {
        divisor *= BASE;
        exponent += 1;
        n /= BASE;
    }
    let suffix = SUFFIXES.get(exponent).copied().unwrap_or(b'?') as char;
    format!("{:.2} {}iB", size as f64 / divisor as f64, suffix)
}

/// "1, 4, 7" from sorted 1-based indexes.
pub fn format_indexes(indexes: &[usize]) -> String {
    indexes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template() {
        let mut values = HashMap::new();
        values.insert("action", "added".to_string());
        values.insert("name", "Release".to_string());
        assert_eq!(
            render_template("{action}: {name} ({name})", &values),
            "added: Release (Release)"
        );
    }

    #[test]
    fn test_render_template_keeps_unknown_placeholders() {
        let values = HashMap::new();
        assert_eq!(render_template("{nope}", &values), "{nope}");
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(2048), "2.00 KiB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.00 MiB");
        assert_eq!(format_file_size(3 * 1024 * 1024 * 1024 / 2), "1.50 GiB");
    }

    #[test]
    fn test_format_indexes() {
        assert_eq!(format_indexes(&[1, 4, 7]), "1, 4, 7");
        assert_eq!(format_indexes(&[]), "");
    }
}
