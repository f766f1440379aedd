//! Redis-backed storage over the §6 key layout: roster sets, an id counter,
//! a per-torrent hash and per-torrent file/meta/image keys.

use std::collections::HashMap;
use std::sync::Mutex;

use redis::{Client, Commands, Connection};

use super::{DbTorrent, Storage, StorageError, INVALID_ID};

const KEY_CHATS: &str = "tt_chat";
const KEY_ADMINS: &str = "tt_adm";
const KEY_OFFSET: &str = "tt_offset";
const KEY_CHAT_OFFSET: &str = "tt_tg_offset";
const KEY_TORRENT_PREFIX: &str = "tt_t_";
const KEY_INDEX: &str = "tt_t_idx";
const KEY_ID_MAP: &str = "tt_ti";
const FIELD_NAME: &str = "name";
const FIELD_DATA: &str = "data";
const FIELD_INDEX: &str = "idx";

pub struct RedisStorage {
    conn: Mutex<Connection>,
}

fn torrent_key(name: &str) -> String {
    format!("{KEY_TORRENT_PREFIX}{name}")
}

fn files_key(id: i64) -> String {
    format!("{KEY_TORRENT_PREFIX}f_{id}")
}

fn meta_key(id: i64) -> String {
    format!("{KEY_TORRENT_PREFIX}m_{id}")
}

fn image_key(id: i64) -> String {
    format!("{KEY_TORRENT_PREFIX}i_{id}")
}

impl RedisStorage {
    pub fn open(address: &str, password: Option<&str>, db: i64) -> Result<Self, StorageError> {
        let url = match password {
            Some(password) if !password.is_empty() => {
                format!("redis://:{password}@{address}/{db}")
            }
            _ => format!("redis://{address}/{db}"),
        };
        let client = Client::open(url)?;
        let mut conn = client.get_connection()?;
        redis::cmd("PING").query::<()>(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn int_set(&self, key: &str) -> Result<Vec<i64>, StorageError> {
        let mut conn = self.conn.lock().unwrap();
        let mut members: Vec<i64> = conn.smembers(key)?;
        members.sort_unstable();
        Ok(members)
    }
}

impl Storage for RedisStorage {
    fn crawl_offset(&self) -> Result<u64, StorageError> {
        let mut conn = self.conn.lock().unwrap();
        let offset: Option<u64> = conn.get(KEY_OFFSET)?;
        Ok(offset.unwrap_or(0))
    }

    fn update_crawl_offset(&self, offset: u64) -> Result<(), StorageError> {
        let mut conn = self.conn.lock().unwrap();
        conn.set::<_, _, ()>(KEY_OFFSET, offset)?;
        Ok(())
    }

    fn chat_offset(&self) -> Result<i64, StorageError> {
        let mut conn = self.conn.lock().unwrap();
        let offset: Option<i64> = conn.get(KEY_CHAT_OFFSET)?;
        Ok(offset.unwrap_or(0))
    }

    fn update_chat_offset(&self, offset: i64) -> Result<(), StorageError> {
        let mut conn = self.conn.lock().unwrap();
        conn.set::<_, _, ()>(KEY_CHAT_OFFSET, offset)?;
        Ok(())
    }

    fn torrent_id(&self, name: &str) -> Result<i64, StorageError> {
        let mut conn = self.conn.lock().unwrap();
        let id: Option<i64> = conn.hget(torrent_key(name), FIELD_INDEX)?;
        Ok(id.unwrap_or(INVALID_ID))
    }

    fn check_torrent(&self, id: i64) -> Result<bool, StorageError> {
        let mut conn = self.conn.lock().unwrap();
        Ok(conn.hexists(KEY_ID_MAP, id)?)
    }

    fn add_torrent(&self, name: &str, raw: &[u8], files: &[String]) -> Result<i64, StorageError> {
        let key = torrent_key(name);
        let mut conn = self.conn.lock().unwrap();
        conn.hset_multiple::<_, _, _, ()>(&key, &[(FIELD_NAME, name.as_bytes()), (FIELD_DATA, raw)])?;
        let id = match conn.hget::<_, _, Option<i64>>(&key, FIELD_INDEX)? {
            Some(id) => id,
            None => {
                let id: i64 = conn.incr(KEY_INDEX, 1)?;
                conn.hset::<_, _, _, ()>(&key, FIELD_INDEX, id)?;
                conn.hset::<_, _, _, ()>(KEY_ID_MAP, id, &key)?;
                id
            }
        };
        if !files.is_empty() {
            conn.sadd::<_, _, ()>(files_key(id), files)?;
        }
        Ok(id)
    }

    fn torrent_files(&self, id: i64) -> Result<Vec<String>, StorageError> {
        let mut conn = self.conn.lock().unwrap();
        let mut files: Vec<String> = conn.smembers(files_key(id))?;
        files.sort_unstable();
        Ok(files)
    }

    fn torrent_meta(&self, id: i64) -> Result<HashMap<String, String>, StorageError> {
        let mut conn = self.conn.lock().unwrap();
        Ok(conn.hgetall(meta_key(id))?)
    }

    fn add_torrent_meta(
        &self,
        id: i64,
        meta: &HashMap<String, String>,
    ) -> Result<(), StorageError> {
        if meta.is_empty() {
            return Ok(());
        }
        let pairs: Vec<(&str, &str)> = meta
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let mut conn = self.conn.lock().unwrap();
        conn.hset_multiple::<_, _, _, ()>(meta_key(id), &pairs)?;
        Ok(())
    }

    fn torrent_image(&self, id: i64) -> Result<Vec<u8>, StorageError> {
        let mut conn = self.conn.lock().unwrap();
        let image: Option<Vec<u8>> = conn.get(image_key(id))?;
        Ok(image.unwrap_or_default())
    }

    fn add_torrent_image(&self, id: i64, image: &[u8]) -> Result<(), StorageError> {
        let mut conn = self.conn.lock().unwrap();
        conn.set::<_, _, ()>(image_key(id), image)?;
        Ok(())
    }

    fn find_torrents(&self, pattern: &str) -> Result<Vec<DbTorrent>, StorageError> {
        let needle = pattern.trim_matches('%');
        let mut conn = self.conn.lock().unwrap();
        let id_map: HashMap<i64, String> = conn.hgetall(KEY_ID_MAP)?;
        let mut out = Vec::new();
        for (id, key) in id_map {
            let name = key.strip_prefix(KEY_TORRENT_PREFIX).unwrap_or(&key);
            if !name.contains(needle) {
                continue;
            }
            let raw: Option<Vec<u8>> = conn.hget(&key, FIELD_DATA)?;
            let image: Option<Vec<u8>> = conn.get(image_key(id))?;
            out.push(DbTorrent {
                id,
                name: name.to_string(),
                raw: raw.unwrap_or_default(),
                image: image.unwrap_or_default(),
            });
        }
        out.sort_by_key(|t| t.id);
        Ok(out)
    }

    fn chats(&self) -> Result<Vec<i64>, StorageError> {
        self.int_set(KEY_CHATS)
    }

    fn chat_exists(&self, chat: i64) -> Result<bool, StorageError> {
        let mut conn = self.conn.lock().unwrap();
        Ok(conn.sismember(KEY_CHATS, chat)?)
    }

    fn add_chat(&self, chat: i64) -> Result<(), StorageError> {
        let mut conn = self.conn.lock().unwrap();
        conn.sadd::<_, _, ()>(KEY_CHATS, chat)?;
        Ok(())
    }

    fn del_chat(&self, chat: i64) -> Result<(), StorageError> {
        let mut conn = self.conn.lock().unwrap();
        conn.srem::<_, _, ()>(KEY_CHATS, chat)?;
        Ok(())
    }

    fn admins(&self) -> Result<Vec<i64>, StorageError> {
        self.int_set(KEY_ADMINS)
    }

    fn admin_exists(&self, id: i64) -> Result<bool, StorageError> {
        let mut conn = self.conn.lock().unwrap();
        Ok(conn.sismember(KEY_ADMINS, id)?)
    }

    fn add_admin(&self, id: i64) -> Result<(), StorageError> {
        let mut conn = self.conn.lock().unwrap();
        conn.sadd::<_, _, ()>(KEY_ADMINS, id)?;
        Ok(())
    }

    fn del_admin(&self, id: i64) -> Result<(), StorageError> {
        let mut conn = self.conn.lock().unwrap();
        conn.srem::<_, _, ()>(KEY_ADMINS, id)?;
        Ok(())
    }

    fn torrents(&self) -> Result<Vec<DbTorrent>, StorageError> {
        Err(StorageError::Unsupported)
    }

    fn put_torrent(&self, torrent: &DbTorrent, files: &[String]) -> Result<(), StorageError> {
        let key = torrent_key(&torrent.name);
        let mut conn = self.conn.lock().unwrap();
        conn.hset_multiple::<_, _, _, ()>(
            &key,
            &[
                (FIELD_NAME, torrent.name.as_bytes()),
                (FIELD_DATA, torrent.raw.as_slice()),
            ],
        )?;
        conn.hset::<_, _, _, ()>(&key, FIELD_INDEX, torrent.id)?;
        conn.hset::<_, _, _, ()>(KEY_ID_MAP, torrent.id, &key)?;
        if !files.is_empty() {
            conn.sadd::<_, _, ()>(files_key(torrent.id), files)?;
        }
        if !torrent.image.is_empty() {
            conn.set::<_, _, ()>(image_key(torrent.id), torrent.image.as_slice())?;
        }
        // Keep the id counter ahead of imported ids.
        let counter: Option<i64> = conn.get(KEY_INDEX)?;
        if counter.unwrap_or(0) < torrent.id {
            conn.set::<_, _, ()>(KEY_INDEX, torrent.id)?;
        }
        Ok(())
    }

    fn close(&self) {}
}
