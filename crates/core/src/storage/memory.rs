//! In-process backend; the reference implementation of the storage contract.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use super::{DbTorrent, Storage, StorageError, INVALID_ID};

#[derive(Default)]
struct Inner {
    crawl_offset: u64,
    chat_offset: i64,
    next_id: i64,
    by_name: BTreeMap<String, i64>,
    raw: HashMap<i64, Vec<u8>>,
    images: HashMap<i64, Vec<u8>>,
    files: HashMap<i64, BTreeSet<String>>,
    meta: HashMap<i64, HashMap<String, String>>,
    chats: BTreeSet<i64>,
    admins: BTreeSet<i64>,
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn crawl_offset(&self) -> Result<u64, StorageError> {
        Ok(self.inner.lock().unwrap().crawl_offset)
    }

    fn update_crawl_offset(&self, offset: u64) -> Result<(), StorageError> {
        self.inner.lock().unwrap().crawl_offset = offset;
        Ok(())
    }

    fn chat_offset(&self) -> Result<i64, StorageError> {
        Ok(self.inner.lock().unwrap().chat_offset)
    }

    fn update_chat_offset(&self, offset: i64) -> Result<(), StorageError> {
        self.inner.lock().unwrap().chat_offset = offset;
        Ok(())
    }

    fn torrent_id(&self, name: &str) -> Result<i64, StorageError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .by_name
            .get(name)
            .copied()
            .unwrap_or(INVALID_ID))
    }

    fn check_torrent(&self, id: i64) -> Result<bool, StorageError> {
        Ok(self.inner.lock().unwrap().raw.contains_key(&id))
    }

    fn add_torrent(&self, name: &str, raw: &[u8], files: &[String]) -> Result<i64, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let id = match inner.by_name.get(name) {
            Some(&id) => id,
            None => {
                inner.next_id += 1;
                let id = inner.next_id;
                inner.by_name.insert(name.to_string(), id);
                id
            }
        };
        inner.raw.insert(id, raw.to_vec());
        inner
            .files
            .entry(id)
            .or_default()
            .extend(files.iter().cloned());
        Ok(id)
    }

    fn torrent_files(&self, id: i64) -> Result<Vec<String>, StorageError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .files
            .get(&id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn torrent_meta(&self, id: i64) -> Result<HashMap<String, String>, StorageError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .meta
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    fn add_torrent_meta(
        &self,
        id: i64,
        meta: &HashMap<String, String>,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.meta.entry(id).or_default();
        for (key, value) in meta {
            entry.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn torrent_image(&self, id: i64) -> Result<Vec<u8>, StorageError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .images
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    fn add_torrent_image(&self, id: i64, image: &[u8]) -> Result<(), StorageError> {
        self.inner.lock().unwrap().images.insert(id, image.to_vec());
        Ok(())
    }

    fn find_torrents(&self, pattern: &str) -> Result<Vec<DbTorrent>, StorageError> {
        let needle = pattern.trim_matches('%');
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .by_name
            .iter()
            .filter(|(name, _)| name.contains(needle))
            .map(|(name, &id)| DbTorrent {
                id,
                name: name.clone(),
                raw: inner.raw.get(&id).cloned().unwrap_or_default(),
                image: inner.images.get(&id).cloned().unwrap_or_default(),
            })
            .collect())
    }

    fn chats(&self) -> Result<Vec<i64>, StorageError> {
        Ok(self.inner.lock().unwrap().chats.iter().copied().collect())
    }

    fn chat_exists(&self, chat: i64) -> Result<bool, StorageError> {
        Ok(self.inner.lock().unwrap().chats.contains(&chat))
    }

    fn add_chat(&self, chat: i64) -> Result<(), StorageError> {
        self.inner.lock().unwrap().chats.insert(chat);
        Ok(())
    }

    fn del_chat(&self, chat: i64) -> Result<(), StorageError> {
        self.inner.lock().unwrap().chats.remove(&chat);
        Ok(())
    }

    fn admins(&self) -> Result<Vec<i64>, StorageError> {
        Ok(self.inner.lock().unwrap().admins.iter().copied().collect())
    }

    fn admin_exists(&self, id: i64) -> Result<bool, StorageError> {
        Ok(self.inner.lock().unwrap().admins.contains(&id))
    }

    fn add_admin(&self, id: i64) -> Result<(), StorageError> {
        self.inner.lock().unwrap().admins.insert(id);
        Ok(())
    }

    fn del_admin(&self, id: i64) -> Result<(), StorageError> {
        self.inner.lock().unwrap().admins.remove(&id);
        Ok(())
    }

    fn torrents(&self) -> Result<Vec<DbTorrent>, StorageError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .by_name
            .iter()
            .map(|(name, &id)| DbTorrent {
                id,
                name: name.clone(),
                raw: inner.raw.get(&id).cloned().unwrap_or_default(),
                image: inner.images.get(&id).cloned().unwrap_or_default(),
            })
            .collect())
    }

    fn put_torrent(&self, torrent: &DbTorrent, files: &[String]) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        inner.by_name.insert(torrent.name.clone(), torrent.id);
        inner.raw.insert(torrent.id, torrent.raw.clone());
        if !torrent.image.is_empty() {
            inner.images.insert(torrent.id, torrent.image.clone());
        }
        inner
            .files
            .entry(torrent.id)
            .or_default()
            .extend(files.iter().cloned());
        inner.next_id = inner.next_id.max(torrent.id);
        Ok(())
    }

    fn close(&self) {}
}
