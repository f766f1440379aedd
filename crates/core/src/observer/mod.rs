//! Top-level wiring: builds storage, sinks, extractor and source from the
//! configuration and exposes the start/suspend surface the cluster
//! coordinator drives.

mod crawler;

pub use crawler::Crawler;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cluster::{BoxError, MasterControl};
use crate::config::{validate_config, Config, ConfigError};
use crate::extractor::{Limits, MetaExtractor};
use crate::sink::{build_sinks, Announcer, SinkError};
use crate::storage::{build_storage, Storage, StorageError};
use crate::torrent::{HttpPageSource, HttpTorrentSource};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const CLOSE_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
}

pub struct Observer {
    storage: Arc<dyn Storage>,
    announcer: Arc<Announcer>,
    crawler: Arc<Crawler>,
    crawl: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl Observer {
    /// Validate the configuration and build every collaborator.
    pub async fn init(config: Config) -> Result<Self, ObserverError> {
        validate_config(&config)?;

        let storage: Arc<dyn Storage> =
            Arc::from(build_storage(config.db.driver, &config.db.params)?);
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        let pages = Arc::new(HttpPageSource::new(client.clone()));
        let source = Arc::new(HttpTorrentSource::new(
            HttpPageSource::new(client),
            config.crawler.baseurl.clone(),
            config.crawler.contexturl.clone(),
        ));
        let extractor = Arc::new(MetaExtractor::new(
            Arc::clone(&pages) as _,
            config.crawler.baseurl.clone(),
            config.crawler.metaactions.clone(),
            Limits {
                max_iterations: config.crawler.limit,
                max_depth: config.crawler.depth,
            },
        ));

        let sinks = build_sinks(&config.producers, Arc::clone(&storage)).await?;
        let announcer = Arc::new(Announcer::new(sinks));

        let crawler = Arc::new(Crawler::new(
            Arc::clone(&storage),
            source,
            extractor,
            Arc::clone(&announcer),
            pages,
            config.crawler,
        ));

        Ok(Self {
            storage,
            announcer,
            crawler,
            crawl: Mutex::new(None),
        })
    }

    /// Spawn the crawl task; a no-op when it is already running.
    pub fn start_crawl(&self) {
        let mut crawl = self.crawl.lock().unwrap();
        if crawl.is_some() {
            warn!("crawl already running");
            return;
        }
        let (shutdown, shutdown_rx) = watch::channel(false);
        let crawler = Arc::clone(&self.crawler);
        let task = tokio::spawn(async move { crawler.run(shutdown_rx).await });
        *crawl = Some((shutdown, task));
    }

    /// Stop the crawl task and wait for it to park.
    pub async fn suspend_crawl(&self) {
        let crawl = self.crawl.lock().unwrap().take();
        if let Some((shutdown, task)) = crawl {
            let _ = shutdown.send(true);
            let _ = task.await;
            info!("crawl suspended");
        }
    }

    /// Suspend the crawl, drain the sinks with a bounded grace, close
    /// storage.
    pub async fn close(&self) {
        self.suspend_crawl().await;
        self.announcer.close(CLOSE_GRACE).await;
        self.storage.close();
        info!("observer closed");
    }
}

#[async_trait::async_trait]
impl MasterControl for Observer {
    async fn start(&self) -> Result<(), BoxError> {
        self.start_crawl();
        Ok(())
    }

    async fn suspend(&self) {
        self.suspend_crawl().await;
    }
}
