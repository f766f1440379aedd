//! Message-bus sink: publishes serialized announcements to a NATS subject,
//! through a JetStream work queue when one can be provisioned.

use std::path::Path;
use std::time::Duration;

use async_nats::jetstream;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Sink, SinkError};
use crate::torrent::{self, TorrentDescriptor};

const MAX_MESSAGE_SIZE: i32 = 10 * 1024 * 1024;
const MAX_MESSAGE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Deserialize)]
pub struct NatsSinkConfig {
    pub url: String,
    /// JetStream stream name; plain publish when unset.
    #[serde(default)]
    pub stream: Option<String>,
    pub subject: String,
    #[serde(default = "default_ping_interval")]
    pub pinginterval: u64,
}

fn default_ping_interval() -> u64 {
    30
}

/// The wire form of one announcement.
#[derive(Debug, Serialize, Deserialize)]
pub struct Announcement {
    pub name: String,
    pub action: String,
    pub length: u64,
    pub url: String,
    pub info_hash_v1: String,
    pub info_hash_v2: Option<String>,
}

pub struct NatsSink {
    client: async_nats::Client,
    jetstream: Option<jetstream::Context>,
    subject: String,
}

impl NatsSink {
    pub async fn from_file(path: &str) -> Result<Self, SinkError> {
        let raw = std::fs::read_to_string(Path::new(path))
            .map_err(|e| SinkError::Config(format!("{path}: {e}")))?;
        let config: NatsSinkConfig =
            serde_json::from_str(&raw).map_err(|e| SinkError::Config(format!("{path}: {e}")))?;
        Self::connect(config).await
    }

    pub async fn connect(config: NatsSinkConfig) -> Result<Self, SinkError> {
        if config.url.is_empty() || config.subject.is_empty() {
            return Err(SinkError::Config("nats url or subject not set".to_string()));
        }
        let client = async_nats::ConnectOptions::new()
            .ping_interval(Duration::from_secs(config.pinginterval))
            .connect(&config.url)
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let jetstream = match &config.stream {
            Some(stream) if !stream.is_empty() => {
                let context = jetstream::new(client.clone());
                match context
                    .get_or_create_stream(jetstream::stream::Config {
                        name: stream.clone(),
                        subjects: vec![config.subject.clone()],
                        retention: jetstream::stream::RetentionPolicy::WorkQueue,
                        max_age: MAX_MESSAGE_AGE,
                        max_message_size: MAX_MESSAGE_SIZE,
                        ..Default::default()
                    })
                    .await
                {
                    Ok(_) => {
                        info!(stream, "jetstream stream ready");
                        Some(context)
                    }
                    Err(e) => {
                        warn!(stream, error = %e, "jetstream unavailable, falling back to plain publish");
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(Self {
            client,
            jetstream,
            subject: config.subject,
        })
    }

    fn announcement(is_new: bool, torrent: &TorrentDescriptor) -> Announcement {
        let hashes = torrent::info_hash(&torrent.raw, true).ok();
        Announcement {
            name: torrent.name.clone(),
            action: if is_new { "added" } else { "updated" }.to_string(),
            length: torrent.length,
            url: torrent.url.clone(),
            info_hash_v1: hashes
                .as_ref()
                .map(|h| hex::encode(h.v1))
                .unwrap_or_default(),
            info_hash_v2: hashes.and_then(|h| h.v2.map(hex::encode)),
        }
    }
}

#[async_trait::async_trait]
impl Sink for NatsSink {
    async fn send(&self, is_new: bool, torrent: &TorrentDescriptor) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(&Self::announcement(is_new, torrent))
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        debug!(name = torrent.name, subject = self.subject, "publishing announcement");
        match &self.jetstream {
            Some(context) => {
                context
                    .publish(self.subject.clone(), payload.into())
                    .await
                    .map_err(|e| SinkError::Transport(e.to_string()))?
                    .await
                    .map_err(|e| SinkError::Transport(e.to_string()))?;
            }
            None => self
                .client
                .publish(self.subject.clone(), payload.into())
                .await
                .map_err(|e| SinkError::Transport(e.to_string()))?,
        }
        Ok(())
    }

    async fn send_milestone(&self, _offset: u64) -> Result<(), SinkError> {
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "nats flush on close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_announcement_serialization() {
        let mut descriptor = TorrentDescriptor::new("A".to_string());
        descriptor.raw = b"d4:infod6:lengthi10e4:name1:Aee".to_vec();
        descriptor.length = 10;
        descriptor.url = "https://tracker.example/t/1".to_string();

        let announcement = NatsSink::announcement(true, &descriptor);
        assert_eq!(announcement.action, "added");
        assert_eq!(announcement.info_hash_v1.len(), 40);
        assert_eq!(announcement.info_hash_v2.as_ref().unwrap().len(), 64);

        let json = serde_json::to_string(&announcement).unwrap();
        let back: Announcement = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "A");
        assert_eq!(back.length, 10);
    }

    #[test]
    fn test_config_defaults() {
        let config: NatsSinkConfig = serde_json::from_str(
            r#"{ "url": "nats://localhost:4222", "subject": "tt.releases" }"#,
        )
        .unwrap();
        assert_eq!(config.pinginterval, 30);
        assert!(config.stream.is_none());
    }
}
