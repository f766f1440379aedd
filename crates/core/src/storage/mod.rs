//! Persistent state behind a pluggable driver.
//!
//! All backends implement the same [`Storage`] contract: torrent records
//! keyed by name with a stable numeric id, set-union file insertion, per-key
//! meta upserts, full image replacement, the crawl cursor and the chat/admin
//! rosters. Backends serialize internally; callers never see their locking.

mod memory;
mod redis;
mod sled;
mod sqlite;

pub use self::memory::MemoryStorage;
pub use self::redis::RedisStorage;
pub use self::sled::SledStorage;
pub use self::sqlite::SqliteStorage;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Id of a torrent that has never been persisted under its name.
pub const INVALID_ID: i64 = -1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend: {0}")]
    Backend(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("operation not supported by this driver")]
    Unsupported,

    #[error("invalid driver parameters: {0}")]
    InvalidParams(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

impl From<::redis::RedisError> for StorageError {
    fn from(e: ::redis::RedisError) -> Self {
        StorageError::Backend(e.to_string())
    }
}

impl From<::sled::Error> for StorageError {
    fn from(e: ::sled::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

/// A persisted torrent row, as moved around by the migration collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbTorrent {
    pub id: i64,
    pub name: String,
    pub raw: Vec<u8>,
    pub image: Vec<u8>,
}

/// The capability set every backend provides.
pub trait Storage: Send + Sync {
    /// Next offset to probe; 0 when never stored.
    fn crawl_offset(&self) -> Result<u64, StorageError>;
    fn update_crawl_offset(&self, offset: u64) -> Result<(), StorageError>;

    /// Chat update-pump cursor used by chat-bot sinks.
    fn chat_offset(&self) -> Result<i64, StorageError>;
    fn update_chat_offset(&self, offset: i64) -> Result<(), StorageError>;

    /// Stable id for `name`, or [`INVALID_ID`] when absent.
    fn torrent_id(&self, name: &str) -> Result<i64, StorageError>;
    fn check_torrent(&self, id: i64) -> Result<bool, StorageError>;
    /// Upsert by name: the raw payload is overwritten, the id stays stable,
    /// `files` are unioned into the existing file-set.
    fn add_torrent(&self, name: &str, raw: &[u8], files: &[String]) -> Result<i64, StorageError>;
    fn torrent_files(&self, id: i64) -> Result<Vec<String>, StorageError>;
    fn torrent_meta(&self, id: i64) -> Result<HashMap<String, String>, StorageError>;
    fn add_torrent_meta(&self, id: i64, meta: &HashMap<String, String>)
        -> Result<(), StorageError>;
    fn torrent_image(&self, id: i64) -> Result<Vec<u8>, StorageError>;
    fn add_torrent_image(&self, id: i64, image: &[u8]) -> Result<(), StorageError>;
    /// Name search for the chat-bot release listing. SQL backends treat
    /// `pattern` as a LIKE pattern, the others as a plain substring.
    fn find_torrents(&self, pattern: &str) -> Result<Vec<DbTorrent>, StorageError>;

    fn chats(&self) -> Result<Vec<i64>, StorageError>;
    fn chat_exists(&self, chat: i64) -> Result<bool, StorageError>;
    fn add_chat(&self, chat: i64) -> Result<(), StorageError>;
    fn del_chat(&self, chat: i64) -> Result<(), StorageError>;

    fn admins(&self) -> Result<Vec<i64>, StorageError>;
    fn admin_exists(&self, id: i64) -> Result<bool, StorageError>;
    fn add_admin(&self, id: i64) -> Result<(), StorageError>;
    fn del_admin(&self, id: i64) -> Result<(), StorageError>;

    /// Bulk export for migration; KV backends may refuse with
    /// [`StorageError::Unsupported`].
    fn torrents(&self) -> Result<Vec<DbTorrent>, StorageError>;
    /// Bulk import for migration; keeps the exported id.
    fn put_torrent(&self, torrent: &DbTorrent, files: &[String]) -> Result<(), StorageError>;

    fn close(&self);
}

/// The storage backend selected in `db.driver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Sqlite,
    Redis,
    Sled,
    Memory,
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Driver::Sqlite => "sqlite",
            Driver::Redis => "redis",
            Driver::Sled => "sled",
            Driver::Memory => "memory",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Driver {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sqlite" => Ok(Driver::Sqlite),
            "redis" => Ok(Driver::Redis),
            "sled" => Ok(Driver::Sled),
            "memory" => Ok(Driver::Memory),
            other => Err(StorageError::InvalidParams(format!(
                "unknown driver `{other}`"
            ))),
        }
    }
}

fn param_str<'a>(
    params: &'a BTreeMap<String, Value>,
    key: &str,
) -> Result<&'a str, StorageError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| StorageError::InvalidParams(format!("`{key}` not set")))
}

/// Build a backend from the configured driver and its parameter table.
pub fn build_storage(
    driver: Driver,
    params: &BTreeMap<String, Value>,
) -> Result<Box<dyn Storage>, StorageError> {
    let storage: Box<dyn Storage> = match driver {
        Driver::Sqlite => Box::new(SqliteStorage::open(param_str(params, "dbfile")?)?),
        Driver::Redis => {
            let address = param_str(params, "address")?;
            let password = params.get("password").and_then(Value::as_str);
            let db = params.get("db").and_then(Value::as_i64).unwrap_or(0);
            Box::new(RedisStorage::open(address, password, db)?)
        }
        Driver::Sled => Box::new(SledStorage::open(param_str(params, "path")?)?),
        Driver::Memory => Box::new(MemoryStorage::new()),
    };
    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_round_trip() {
        for driver in [Driver::Sqlite, Driver::Redis, Driver::Sled, Driver::Memory] {
            assert_eq!(driver.to_string().parse::<Driver>().unwrap(), driver);
        }
        assert!("mongodb".parse::<Driver>().is_err());
    }

    #[test]
    fn test_build_storage_missing_param() {
        let params = BTreeMap::new();
        assert!(matches!(
            build_storage(Driver::Sqlite, &params),
            Err(StorageError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_build_memory_storage() {
        let storage = build_storage(Driver::Memory, &BTreeMap::new()).unwrap();
        assert_eq!(storage.crawl_offset().unwrap(), 0);
        assert_eq!(storage.torrent_id("missing").unwrap(), INVALID_ID);
    }
}
