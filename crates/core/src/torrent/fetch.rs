use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use super::{codec, DecodeError, TorrentDescriptor};

/// Errors from fetching an upstream page or payload.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("empty url")]
    InvalidUrl,

    #[error("http transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("http status {0}")]
    Status(u16),

    #[error("empty response body")]
    EmptyBody,
}

/// Errors from resolving an offset into a descriptor.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Raw page retrieval. Production goes over HTTP; tests feed canned bytes.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Resolves crawl offsets to torrent descriptors.
#[async_trait]
pub trait TorrentSource: Send + Sync {
    /// Fetch and decode the descriptor at `offset`; `Ok(None)` when the
    /// upstream payload is not a torrent.
    async fn torrent_at(&self, offset: u64) -> Result<Option<TorrentDescriptor>, SourceError>;

    /// Relative page path for `offset`, used as the `${torrent}` context.
    fn context(&self, offset: u64) -> String;

    /// Absolute URL of the source page for `offset`.
    fn page_url(&self, offset: u64) -> String;
}

/// [`PageSource`] over a shared reqwest client.
pub struct HttpPageSource {
    client: reqwest::Client,
}

impl HttpPageSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if url.is_empty() {
            return Err(FetchError::InvalidUrl);
        }
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(FetchError::EmptyBody);
        }
        Ok(body.to_vec())
    }
}

/// Production [`TorrentSource`]: formats the configured context template,
/// prepends the base URL and decodes whatever comes back.
pub struct HttpTorrentSource<P> {
    pages: P,
    base_url: String,
    context_template: String,
}

impl<P: PageSource> HttpTorrentSource<P> {
    pub fn new(pages: P, base_url: String, context_template: String) -> Self {
        Self {
            pages,
            base_url,
            context_template,
        }
    }
}

#[async_trait]
impl<P: PageSource> TorrentSource for HttpTorrentSource<P> {
    async fn torrent_at(&self, offset: u64) -> Result<Option<TorrentDescriptor>, SourceError> {
        let url = self.page_url(offset);
        debug!(offset, url, "probing upstream");
        let body = self.pages.fetch(&url).await?;
        let descriptor = codec::decode(&body)?;
        Ok(descriptor.map(|mut d| {
            d.url = url;
            d
        }))
    }

    fn context(&self, offset: u64) -> String {
        self.context_template.replace("%d", &offset.to_string())
    }

    fn page_url(&self, offset: u64) -> String {
        format!("{}{}", self.base_url, self.context(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPageSource;

    #[tokio::test]
    async fn test_context_substitution() {
        let source = HttpTorrentSource::new(
            MockPageSource::new(),
            "https://tracker.example".to_string(),
            "/download.php?id=%d".to_string(),
        );
        assert_eq!(source.context(17), "/download.php?id=17");
        assert_eq!(
            source.page_url(17),
            "https://tracker.example/download.php?id=17"
        );
    }

    #[tokio::test]
    async fn test_torrent_at_decodes_and_stamps_url() {
        let pages = MockPageSource::new();
        pages.put(
            "https://tracker.example/t/3",
            b"d4:infod6:lengthi10e4:name1:Aee".to_vec(),
        );
        let source =
            HttpTorrentSource::new(pages, "https://tracker.example".to_string(), "/t/%d".to_string());

        let descriptor = source.torrent_at(3).await.unwrap().unwrap();
        assert_eq!(descriptor.name, "A");
        assert_eq!(descriptor.url, "https://tracker.example/t/3");
    }

    #[tokio::test]
    async fn test_torrent_at_propagates_http_error() {
        let source = HttpTorrentSource::new(
            MockPageSource::new(),
            "https://tracker.example".to_string(),
            "/t/%d".to_string(),
        );
        assert!(matches!(
            source.torrent_at(5).await,
            Err(SourceError::Fetch(FetchError::Status(404)))
        ));
    }
}
