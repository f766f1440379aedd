//! Upstream torrent handling: bencode decoding, descriptor construction,
//! info-hash computation, page/poster fetching.

pub mod bencode;
mod codec;
mod fetch;
mod poster;

pub use codec::{decode, info_hash, InfoHash};
pub use fetch::{
    FetchError, HttpPageSource, HttpTorrentSource, PageSource, SourceError, TorrentSource,
};
pub use poster::{fetch_poster, PosterError};

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::storage::INVALID_ID;

/// Errors produced while turning an upstream blob into a descriptor.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed bencode: {0}")]
    Bencode(#[from] bencode::BencodeError),

    #[error("torrent root is not a dictionary")]
    NotADictionary,

    #[error("torrent dictionary missing `{0}`")]
    MissingField(&'static str),
}

/// The in-flight record the crawl loop carries from decode to announce.
///
/// `id` stays [`INVALID_ID`] until the descriptor has been persisted under
/// its name.
#[derive(Debug, Clone)]
pub struct TorrentDescriptor {
    pub id: i64,
    pub name: String,
    /// Absolute URL of the source page.
    pub url: String,
    /// Bencoded upstream payload, preserved verbatim.
    pub raw: Vec<u8>,
    /// Full logical path -> true iff the file is new in this revision.
    /// Sorted by path, which fixes the numbering used by announcements.
    pub files: BTreeMap<String, bool>,
    /// Sum of file lengths, or the single-file length.
    pub length: u64,
    /// HTML-extracted fields; may be empty.
    pub meta: HashMap<String, String>,
    /// JPEG poster bytes; may be empty.
    pub image: Vec<u8>,
}

impl TorrentDescriptor {
    pub fn new(name: String) -> Self {
        Self {
            id: INVALID_ID,
            name,
            url: String::new(),
            raw: Vec::new(),
            files: BTreeMap::new(),
            length: 0,
            meta: HashMap::new(),
            image: Vec::new(),
        }
    }

    /// Paths introduced by this revision, sorted.
    pub fn new_files(&self) -> Vec<&str> {
        self.files
            .iter()
            .filter_map(|(path, is_new)| is_new.then_some(path.as_str()))
            .collect()
    }

    /// 1-based positions of new files within the sorted file list.
    pub fn new_file_indexes(&self) -> Vec<usize> {
        self.files
            .values()
            .enumerate()
            .filter_map(|(i, is_new)| is_new.then_some(i + 1))
            .collect()
    }
}
