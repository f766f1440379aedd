//! The crawl loop: probes a window of offsets, classifies hits as new or
//! revised, persists them, enriches them and hands them to the announcer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::CrawlerConfig;
use crate::extractor::MetaExtractor;
use crate::sink::Announcer;
use crate::storage::{Storage, INVALID_ID};
use crate::torrent::{
    fetch_poster, PageSource, SourceError, TorrentDescriptor, TorrentSource,
};

const MIN_DELAY_SECS: u64 = 5;

pub struct Crawler {
    storage: Arc<dyn Storage>,
    source: Arc<dyn TorrentSource>,
    extractor: Arc<MetaExtractor>,
    announcer: Arc<Announcer>,
    pages: Arc<dyn PageSource>,
    config: CrawlerConfig,
}

impl Crawler {
    pub fn new(
        storage: Arc<dyn Storage>,
        source: Arc<dyn TorrentSource>,
        extractor: Arc<MetaExtractor>,
        announcer: Arc<Announcer>,
        pages: Arc<dyn PageSource>,
        config: CrawlerConfig,
    ) -> Self {
        Self {
            storage,
            source,
            extractor,
            announcer,
            pages,
            config,
        }
    }

    /// Run until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut next = match self.storage.crawl_offset() {
            Ok(next) => next,
            Err(e) => {
                error!(error = %e, "crawl offset unavailable, starting from 0");
                0
            }
        };
        info!(next, "crawl loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            next = self.scan_window(next).await;

            let delay = Duration::from_secs(self.config.delay.max(MIN_DELAY_SECS));
            debug!(seconds = delay.as_secs(), "sleeping");
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("crawl loop stopped");
    }

    /// Probe `[next, next + threshold)`; returns the new cursor.
    ///
    /// Transient failures (HTTP, storage) abandon the rest of the window so
    /// the failing offset is retried on the next pass; payloads that are
    /// valid but not torrents never advance the cursor by themselves.
    pub async fn scan_window(&self, next: u64) -> u64 {
        let mut advanced = next;
        for offset in next..next + u64::from(self.config.threshold) {
            debug!(offset, "checking offset");
            match self.source.torrent_at(offset).await {
                Ok(Some(mut descriptor)) => {
                    if descriptor.length == 0 {
                        warn!(offset, name = descriptor.name, "zero torrent size");
                        continue;
                    }
                    let id = match self.storage.torrent_id(&descriptor.name) {
                        Ok(id) => id,
                        Err(e) => {
                            error!(offset, error = %e, "torrent lookup failed");
                            break;
                        }
                    };
                    let is_new = id == INVALID_ID;
                    if !is_new {
                        match self.storage.torrent_files(id) {
                            Ok(existing) => {
                                for path in existing {
                                    if let Some(flag) = descriptor.files.get_mut(&path) {
                                        *flag = false;
                                    }
                                }
                            }
                            Err(e) => {
                                error!(offset, error = %e, "file history lookup failed");
                                break;
                            }
                        }
                    }

                    let paths: Vec<String> = descriptor.files.keys().cloned().collect();
                    match self
                        .storage
                        .add_torrent(&descriptor.name, &descriptor.raw, &paths)
                    {
                        Ok(id) => descriptor.id = id,
                        Err(e) => {
                            error!(offset, error = %e, "torrent not persisted");
                            break;
                        }
                    }
                    info!(
                        offset,
                        name = descriptor.name,
                        length = descriptor.length,
                        is_new,
                        "torrent observed"
                    );

                    self.notify(descriptor, is_new, offset).await;

                    if offset > 0
                        && self.config.anniversary > 0
                        && offset % self.config.anniversary == 0
                    {
                        self.announcer.send_milestone(offset);
                    }
                    advanced = offset + 1;
                }
                Ok(None) => {
                    debug!(offset, "not a torrent");
                }
                Err(SourceError::Decode(e)) => {
                    warn!(offset, error = %e, "undecodable payload");
                }
                Err(SourceError::Fetch(e)) => {
                    warn!(offset, error = %e, "crawl error");
                    break;
                }
            }
        }

        if advanced > next {
            if let Err(e) = self.storage.update_crawl_offset(advanced) {
                error!(error = %e, "crawl offset not persisted");
            }
        }
        advanced
    }

    /// Enrich the descriptor with meta, poster and context URL, then hand it
    /// to the announcer.
    async fn notify(&self, mut descriptor: TorrentDescriptor, is_new: bool, offset: u64) {
        if !self.extractor.is_empty() {
            let context = self.source.context(offset);
            let mut fields = self.extractor.extract(&context).await;
            if fields.is_empty() && self.config.metaretry > 0 {
                debug!(offset, "empty extraction, retrying after grace");
                tokio::time::sleep(Duration::from_secs(self.config.metaretry)).await;
                fields = self.extractor.extract(&context).await;
            }

            let stored = self
                .storage
                .torrent_meta(descriptor.id)
                .unwrap_or_else(|e| {
                    warn!(error = %e, "stored meta unavailable");
                    HashMap::new()
                });

            if fields.is_empty() {
                descriptor.meta = stored.clone();
            } else {
                descriptor.meta = fields
                    .into_iter()
                    .map(|(key, value)| (key, String::from_utf8_lossy(&value).into_owned()))
                    .collect();
                if let Err(e) = self.storage.add_torrent_meta(descriptor.id, &descriptor.meta) {
                    error!(error = %e, "meta not persisted");
                }
            }

            self.refresh_poster(&mut descriptor, &stored).await;
        }

        self.announcer.send(is_new, descriptor);
    }

    /// Refetch the poster iff its URL changed or nothing is cached.
    async fn refresh_poster(
        &self,
        descriptor: &mut TorrentDescriptor,
        stored_meta: &HashMap<String, String>,
    ) {
        let field = &self.config.imagemetafield;
        if field.is_empty() {
            return;
        }
        let cached = self
            .storage
            .torrent_image(descriptor.id)
            .unwrap_or_default();
        let current_url = descriptor.meta.get(field);
        let previous_url = stored_meta.get(field);

        let Some(url) = current_url else {
            descriptor.image = cached;
            return;
        };
        if current_url == previous_url && !cached.is_empty() {
            descriptor.image = cached;
            return;
        }

        let absolute = if url.contains(&self.config.baseurl) {
            url.clone()
        } else {
            format!("{}{}", self.config.baseurl, url)
        };
        match fetch_poster(self.pages.as_ref(), &absolute, self.config.imagethumb).await {
            Ok(image) => {
                if let Err(e) = self.storage.add_torrent_image(descriptor.id, &image) {
                    error!(error = %e, "poster not persisted");
                }
                descriptor.image = image;
            }
            Err(e) => {
                warn!(url = absolute, error = %e, "poster fetch failed");
                descriptor.image = cached;
            }
        }
    }
}
