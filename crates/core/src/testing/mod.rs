//! Controllable test doubles for the crawl pipeline.
//!
//! Production code never depends on this module; integration tests wire the
//! crawler against these the same way the daemon wires the real HTTP and
//! sink implementations.

pub mod fixtures;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::sink::{Sink, SinkError};
use crate::torrent::{
    FetchError, PageSource, SourceError, TorrentDescriptor, TorrentSource,
};

/// [`PageSource`] backed by a url -> bytes map; unknown urls return 404.
#[derive(Default)]
pub struct MockPageSource {
    pages: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockPageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, url: &str, body: Vec<u8>) {
        self.pages.lock().unwrap().insert(url.to_string(), body);
    }
}

#[async_trait]
impl PageSource for MockPageSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if url.is_empty() {
            return Err(FetchError::InvalidUrl);
        }
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or(FetchError::Status(404))
    }
}

/// Scripted upstream response for one offset.
#[derive(Debug, Clone)]
pub enum MockUpstream {
    Torrent(TorrentDescriptor),
    /// Valid payload that is not a torrent.
    NotATorrent,
    HttpError(u16),
}

/// [`TorrentSource`] replaying scripted responses; unprogrammed offsets
/// behave like the upstream head (404).
#[derive(Default)]
pub struct MockTorrentSource {
    responses: Mutex<HashMap<u64, MockUpstream>>,
}

impl MockTorrentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, offset: u64, response: MockUpstream) {
        self.responses.lock().unwrap().insert(offset, response);
    }

    pub fn put_torrent(&self, offset: u64, descriptor: TorrentDescriptor) {
        self.put(offset, MockUpstream::Torrent(descriptor));
    }
}

#[async_trait]
impl TorrentSource for MockTorrentSource {
    async fn torrent_at(&self, offset: u64) -> Result<Option<TorrentDescriptor>, SourceError> {
        let response = self.responses.lock().unwrap().get(&offset).cloned();
        match response {
            Some(MockUpstream::Torrent(mut descriptor)) => {
                descriptor.url = self.page_url(offset);
                Ok(Some(descriptor))
            }
            Some(MockUpstream::NotATorrent) => Ok(None),
            Some(MockUpstream::HttpError(status)) => {
                Err(SourceError::Fetch(FetchError::Status(status)))
            }
            None => Err(SourceError::Fetch(FetchError::Status(404))),
        }
    }

    fn context(&self, offset: u64) -> String {
        format!("/page/{offset}")
    }

    fn page_url(&self, offset: u64) -> String {
        format!("https://upstream.test/page/{offset}")
    }
}

/// What a [`MockSink`] saw, in arrival order.
#[derive(Debug, Clone)]
pub enum SinkRecord {
    Torrent { name: String, is_new: bool },
    Milestone(u64),
}

/// Recording sink; optionally fails every delivery.
#[derive(Default)]
pub struct MockSink {
    events: Mutex<Vec<SinkRecord>>,
    descriptors: Mutex<Vec<(bool, TorrentDescriptor)>>,
    fail: bool,
    closed: AtomicBool,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<SinkRecord> {
        self.events.lock().unwrap().clone()
    }

    /// Full descriptors from `send`, with their newness flag.
    pub fn torrents(&self) -> Vec<(bool, TorrentDescriptor)> {
        self.descriptors.lock().unwrap().clone()
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for MockSink {
    async fn send(&self, is_new: bool, torrent: &TorrentDescriptor) -> Result<(), SinkError> {
        if self.fail {
            return Err(SinkError::Transport("mock failure".to_string()));
        }
        self.events.lock().unwrap().push(SinkRecord::Torrent {
            name: torrent.name.clone(),
            is_new,
        });
        self.descriptors
            .lock()
            .unwrap()
            .push((is_new, torrent.clone()));
        Ok(())
    }

    async fn send_milestone(&self, offset: u64) -> Result<(), SinkError> {
        if self.fail {
            return Err(SinkError::Transport("mock failure".to_string()));
        }
        self.events
            .lock()
            .unwrap()
            .push(SinkRecord::Milestone(offset));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
