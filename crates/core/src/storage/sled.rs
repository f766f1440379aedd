//! Embedded B-tree storage on sled. One tree per relation; numeric keys are
//! big-endian so range scans stay ordered.

use std::collections::HashMap;

use super::{DbTorrent, Storage, StorageError, INVALID_ID};

const TREE_CONFIG: &str = "config";
const TREE_CHATS: &str = "chats";
const TREE_ADMINS: &str = "admins";
const TREE_BY_NAME: &str = "torrents_by_name";
const TREE_BY_ID: &str = "torrents_by_id";
const TREE_RAW: &str = "torrent_raw";
const TREE_IMAGE: &str = "torrent_image";
const TREE_FILES: &str = "torrent_files";
const TREE_META: &str = "torrent_meta";

const KEY_CRAWL_OFFSET: &[u8] = b"crawl_offset";
const KEY_CHAT_OFFSET: &[u8] = b"chat_offset";
const KEY_SEQ: &[u8] = b"torrent_seq";

pub struct SledStorage {
    db: sled::Db,
    config: sled::Tree,
    chats: sled::Tree,
    admins: sled::Tree,
    by_name: sled::Tree,
    by_id: sled::Tree,
    raw: sled::Tree,
    image: sled::Tree,
    files: sled::Tree,
    meta: sled::Tree,
}

fn be64(id: i64) -> [u8; 8] {
    (id as u64).to_be_bytes()
}

fn read_i64(bytes: &[u8]) -> Result<i64, StorageError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::Corrupt("numeric key width".to_string()))?;
    Ok(u64::from_be_bytes(arr) as i64)
}

/// id-prefixed composite key for the file and meta trees.
fn composite(id: i64, suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + suffix.len());
    key.extend_from_slice(&be64(id));
    key.extend_from_slice(suffix);
    key
}

impl SledStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self {
            config: db.open_tree(TREE_CONFIG)?,
            chats: db.open_tree(TREE_CHATS)?,
            admins: db.open_tree(TREE_ADMINS)?,
            by_name: db.open_tree(TREE_BY_NAME)?,
            by_id: db.open_tree(TREE_BY_ID)?,
            raw: db.open_tree(TREE_RAW)?,
            image: db.open_tree(TREE_IMAGE)?,
            files: db.open_tree(TREE_FILES)?,
            meta: db.open_tree(TREE_META)?,
            db,
        })
    }

    fn next_id(&self) -> Result<i64, StorageError> {
        let value = self.config.update_and_fetch(KEY_SEQ, |old| {
            let next = old
                .and_then(|bytes| bytes.try_into().ok())
                .map(u64::from_be_bytes)
                .unwrap_or(0)
                + 1;
            Some(next.to_be_bytes().to_vec())
        })?;
        let value = value.ok_or_else(|| StorageError::Corrupt("sequence missing".to_string()))?;
        read_i64(&value)
    }

    fn bump_seq(&self, id: i64) -> Result<(), StorageError> {
        self.config.update_and_fetch(KEY_SEQ, |old| {
            let current = old
                .and_then(|bytes| bytes.try_into().ok())
                .map(u64::from_be_bytes)
                .unwrap_or(0);
            Some(current.max(id as u64).to_be_bytes().to_vec())
        })?;
        Ok(())
    }

    fn int_set(&self, tree: &sled::Tree) -> Result<Vec<i64>, StorageError> {
        let mut out = Vec::new();
        for entry in tree.iter() {
            let (key, _) = entry?;
            out.push(read_i64(&key)?);
        }
        Ok(out)
    }

    fn load_torrent(&self, id: i64, name: &str) -> Result<DbTorrent, StorageError> {
        Ok(DbTorrent {
            id,
            name: name.to_string(),
            raw: self
                .raw
                .get(be64(id))?
                .map(|v| v.to_vec())
                .unwrap_or_default(),
            image: self
                .image
                .get(be64(id))?
                .map(|v| v.to_vec())
                .unwrap_or_default(),
        })
    }
}

impl Storage for SledStorage {
    fn crawl_offset(&self) -> Result<u64, StorageError> {
        Ok(self
            .config
            .get(KEY_CRAWL_OFFSET)?
            .map(|v| read_i64(&v))
            .transpose()?
            .unwrap_or(0) as u64)
    }

    fn update_crawl_offset(&self, offset: u64) -> Result<(), StorageError> {
        self.config
            .insert(KEY_CRAWL_OFFSET, offset.to_be_bytes().to_vec())?;
        Ok(())
    }

    fn chat_offset(&self) -> Result<i64, StorageError> {
        Ok(self
            .config
            .get(KEY_CHAT_OFFSET)?
            .map(|v| read_i64(&v))
            .transpose()?
            .unwrap_or(0))
    }

    fn update_chat_offset(&self, offset: i64) -> Result<(), StorageError> {
        self.config.insert(KEY_CHAT_OFFSET, be64(offset).to_vec())?;
        Ok(())
    }

    fn torrent_id(&self, name: &str) -> Result<i64, StorageError> {
        Ok(self
            .by_name
            .get(name.as_bytes())?
            .map(|v| read_i64(&v))
            .transpose()?
            .unwrap_or(INVALID_ID))
    }

    fn check_torrent(&self, id: i64) -> Result<bool, StorageError> {
        Ok(self.by_id.contains_key(be64(id))?)
    }

    fn add_torrent(&self, name: &str, raw: &[u8], files: &[String]) -> Result<i64, StorageError> {
        let id = match self.torrent_id(name)? {
            INVALID_ID => {
                let id = self.next_id()?;
                self.by_name.insert(name.as_bytes(), be64(id).to_vec())?;
                self.by_id.insert(be64(id), name.as_bytes())?;
                id
            }
            id => id,
        };
        self.raw.insert(be64(id), raw)?;
        for file in files {
            self.files.insert(composite(id, file.as_bytes()), Vec::new())?;
        }
        Ok(id)
    }

    fn torrent_files(&self, id: i64) -> Result<Vec<String>, StorageError> {
        let mut out = Vec::new();
        for entry in self.files.scan_prefix(be64(id)) {
            let (key, _) = entry?;
            out.push(String::from_utf8_lossy(&key[8..]).into_owned());
        }
        Ok(out)
    }

    fn torrent_meta(&self, id: i64) -> Result<HashMap<String, String>, StorageError> {
        let mut out = HashMap::new();
        for entry in self.meta.scan_prefix(be64(id)) {
            let (key, value) = entry?;
            out.insert(
                String::from_utf8_lossy(&key[8..]).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            );
        }
        Ok(out)
    }

    fn add_torrent_meta(
        &self,
        id: i64,
        meta: &HashMap<String, String>,
    ) -> Result<(), StorageError> {
        for (key, value) in meta {
            self.meta
                .insert(composite(id, key.as_bytes()), value.as_bytes())?;
        }
        Ok(())
    }

    fn torrent_image(&self, id: i64) -> Result<Vec<u8>, StorageError> {
        Ok(self
            .image
            .get(be64(id))?
            .map(|v| v.to_vec())
            .unwrap_or_default())
    }

    fn add_torrent_image(&self, id: i64, image: &[u8]) -> Result<(), StorageError> {
        self.image.insert(be64(id), image)?;
        Ok(())
    }

    fn find_torrents(&self, pattern: &str) -> Result<Vec<DbTorrent>, StorageError> {
        let needle = pattern.trim_matches('%');
        let mut out = Vec::new();
        for entry in self.by_id.iter() {
            let (key, value) = entry?;
            let name = String::from_utf8_lossy(&value).into_owned();
            if name.contains(needle) {
                out.push(self.load_torrent(read_i64(&key)?, &name)?);
            }
        }
        Ok(out)
    }

    fn chats(&self) -> Result<Vec<i64>, StorageError> {
        self.int_set(&self.chats)
    }

    fn chat_exists(&self, chat: i64) -> Result<bool, StorageError> {
        Ok(self.chats.contains_key(be64(chat))?)
    }

    fn add_chat(&self, chat: i64) -> Result<(), StorageError> {
        self.chats.insert(be64(chat), Vec::new())?;
        Ok(())
    }

    fn del_chat(&self, chat: i64) -> Result<(), StorageError> {
        self.chats.remove(be64(chat))?;
        Ok(())
    }

    fn admins(&self) -> Result<Vec<i64>, StorageError> {
        self.int_set(&self.admins)
    }

    fn admin_exists(&self, id: i64) -> Result<bool, StorageError> {
        Ok(self.admins.contains_key(be64(id))?)
    }

    fn add_admin(&self, id: i64) -> Result<(), StorageError> {
        self.admins.insert(be64(id), Vec::new())?;
        Ok(())
    }

    fn del_admin(&self, id: i64) -> Result<(), StorageError> {
        self.admins.remove(be64(id))?;
        Ok(())
    }

    fn torrents(&self) -> Result<Vec<DbTorrent>, StorageError> {
        let mut out = Vec::new();
        for entry in self.by_id.iter() {
            let (key, value) = entry?;
            let name = String::from_utf8_lossy(&value).into_owned();
            out.push(self.load_torrent(read_i64(&key)?, &name)?);
        }
        Ok(out)
    }

    fn put_torrent(&self, torrent: &DbTorrent, files: &[String]) -> Result<(), StorageError> {
        self.by_name
            .insert(torrent.name.as_bytes(), be64(torrent.id).to_vec())?;
        self.by_id
            .insert(be64(torrent.id), torrent.name.as_bytes())?;
        self.raw.insert(be64(torrent.id), torrent.raw.as_slice())?;
        if !torrent.image.is_empty() {
            self.image
                .insert(be64(torrent.id), torrent.image.as_slice())?;
        }
        for file in files {
            self.files
                .insert(composite(torrent.id, file.as_bytes()), Vec::new())?;
        }
        self.bump_seq(torrent.id)
    }

    fn close(&self) {
        let _ = self.db.flush();
    }
}
