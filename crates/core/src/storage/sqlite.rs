//! SQLite-backed storage.

use std::collections::HashMap;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use super::{DbTorrent, Storage, StorageError, INVALID_ID};

const CRAWL_OFFSET: &str = "CRAWL_OFFSET";
const TG_OFFSET: &str = "TG_OFFSET";

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (and initialize) the database file.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// In-memory database, useful for testing.
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS TT_CHAT(
                ID INTEGER PRIMARY KEY
            );
            CREATE TABLE IF NOT EXISTS TT_ADMIN(
                ID INTEGER PRIMARY KEY
            );
            CREATE TABLE IF NOT EXISTS TT_TORRENT(
                ID INTEGER PRIMARY KEY AUTOINCREMENT,
                NAME TEXT NOT NULL UNIQUE,
                DATA BLOB,
                IMAGE BLOB
            );
            CREATE TABLE IF NOT EXISTS TT_TORRENT_FILE(
                ID INTEGER PRIMARY KEY AUTOINCREMENT,
                TORRENT INTEGER NOT NULL,
                NAME TEXT NOT NULL,
                UNIQUE(TORRENT, NAME)
            );
            CREATE TABLE IF NOT EXISTS TT_TORRENT_META(
                TORRENT INTEGER NOT NULL,
                NAME TEXT NOT NULL,
                VALUE TEXT,
                PRIMARY KEY(TORRENT, NAME)
            );
            CREATE TABLE IF NOT EXISTS TT_CONFIG(
                NAME TEXT PRIMARY KEY,
                VALUE TEXT
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn config_value(&self, name: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT VALUE FROM TT_CONFIG WHERE NAME = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn update_config_value(&self, name: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO TT_CONFIG(NAME, VALUE) VALUES (?1, ?2)
             ON CONFLICT(NAME) DO UPDATE SET VALUE = excluded.VALUE",
            params![name, value],
        )?;
        Ok(())
    }

    fn int_set(&self, query: &str) -> Result<Vec<i64>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(query)?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn exists(&self, query: &str, id: i64) -> Result<bool, StorageError> {
        let conn = self.conn.lock().unwrap();
        let found = conn
            .query_row(query, params![id], |_| Ok(()))
            .optional()?
            .is_some();
        Ok(found)
    }
}

impl Storage for SqliteStorage {
    fn crawl_offset(&self) -> Result<u64, StorageError> {
        match self.config_value(CRAWL_OFFSET)? {
            Some(value) => value
                .parse()
                .map_err(|_| StorageError::Corrupt(format!("crawl offset `{value}`"))),
            None => Ok(0),
        }
    }

    fn update_crawl_offset(&self, offset: u64) -> Result<(), StorageError> {
        self.update_config_value(CRAWL_OFFSET, &offset.to_string())
    }

    fn chat_offset(&self) -> Result<i64, StorageError> {
        match self.config_value(TG_OFFSET)? {
            Some(value) => value
                .parse()
                .map_err(|_| StorageError::Corrupt(format!("chat offset `{value}`"))),
            None => Ok(0),
        }
    }

    fn update_chat_offset(&self, offset: i64) -> Result<(), StorageError> {
        self.update_config_value(TG_OFFSET, &offset.to_string())
    }

    fn torrent_id(&self, name: &str) -> Result<i64, StorageError> {
        let conn = self.conn.lock().unwrap();
        let id = conn
            .query_row(
                "SELECT ID FROM TT_TORRENT WHERE NAME = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.unwrap_or(INVALID_ID))
    }

    fn check_torrent(&self, id: i64) -> Result<bool, StorageError> {
        self.exists("SELECT 1 FROM TT_TORRENT WHERE ID = ?1", id)
    }

    fn add_torrent(&self, name: &str, raw: &[u8], files: &[String]) -> Result<i64, StorageError> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO TT_TORRENT(NAME, DATA) VALUES (?1, ?2)
                 ON CONFLICT(NAME) DO UPDATE SET DATA = excluded.DATA",
                params![name, raw],
            )?;
        }
        let id = self.torrent_id(name)?;
        let conn = self.conn.lock().unwrap();
        for file in files {
            conn.execute(
                "INSERT INTO TT_TORRENT_FILE(TORRENT, NAME) VALUES (?1, ?2)
                 ON CONFLICT(TORRENT, NAME) DO NOTHING",
                params![id, file],
            )?;
        }
        Ok(id)
    }

    fn torrent_files(&self, id: i64) -> Result<Vec<String>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT NAME FROM TT_TORRENT_FILE WHERE TORRENT = ?1 ORDER BY NAME")?;
        let rows = stmt.query_map(params![id], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn torrent_meta(&self, id: i64) -> Result<HashMap<String, String>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT NAME, VALUE FROM TT_TORRENT_META WHERE TORRENT = ?1")?;
        let rows = stmt.query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = HashMap::new();
        for row in rows {
            let (key, value): (String, String) = row?;
            out.insert(key, value);
        }
        Ok(out)
    }

    fn add_torrent_meta(
        &self,
        id: i64,
        meta: &HashMap<String, String>,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        for (key, value) in meta {
            conn.execute(
                "INSERT INTO TT_TORRENT_META(TORRENT, NAME, VALUE) VALUES (?1, ?2, ?3)
                 ON CONFLICT(TORRENT, NAME) DO UPDATE SET VALUE = excluded.VALUE",
                params![id, key, value],
            )?;
        }
        Ok(())
    }

    fn torrent_image(&self, id: i64) -> Result<Vec<u8>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let image: Option<Option<Vec<u8>>> = conn
            .query_row(
                "SELECT IMAGE FROM TT_TORRENT WHERE ID = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(image.flatten().unwrap_or_default())
    }

    fn add_torrent_image(&self, id: i64, image: &[u8]) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE TT_TORRENT SET IMAGE = ?1 WHERE ID = ?2",
            params![image, id],
        )?;
        Ok(())
    }

    fn find_torrents(&self, pattern: &str) -> Result<Vec<DbTorrent>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT ID, NAME, DATA, IMAGE FROM TT_TORRENT WHERE NAME LIKE ?1 ORDER BY ID",
        )?;
        let rows = stmt.query_map(params![pattern], row_to_torrent)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn chats(&self) -> Result<Vec<i64>, StorageError> {
        self.int_set("SELECT ID FROM TT_CHAT ORDER BY ID")
    }

    fn chat_exists(&self, chat: i64) -> Result<bool, StorageError> {
        self.exists("SELECT 1 FROM TT_CHAT WHERE ID = ?1", chat)
    }

    fn add_chat(&self, chat: i64) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO TT_CHAT(ID) VALUES (?1) ON CONFLICT(ID) DO NOTHING",
            params![chat],
        )?;
        Ok(())
    }

    fn del_chat(&self, chat: i64) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM TT_CHAT WHERE ID = ?1", params![chat])?;
        Ok(())
    }

    fn admins(&self) -> Result<Vec<i64>, StorageError> {
        self.int_set("SELECT ID FROM TT_ADMIN ORDER BY ID")
    }

    fn admin_exists(&self, id: i64) -> Result<bool, StorageError> {
        self.exists("SELECT 1 FROM TT_ADMIN WHERE ID = ?1", id)
    }

    fn add_admin(&self, id: i64) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO TT_ADMIN(ID) VALUES (?1) ON CONFLICT(ID) DO NOTHING",
            params![id],
        )?;
        Ok(())
    }

    fn del_admin(&self, id: i64) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM TT_ADMIN WHERE ID = ?1", params![id])?;
        Ok(())
    }

    fn torrents(&self) -> Result<Vec<DbTorrent>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT ID, NAME, DATA, IMAGE FROM TT_TORRENT ORDER BY ID")?;
        let rows = stmt.query_map([], row_to_torrent)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn put_torrent(&self, torrent: &DbTorrent, files: &[String]) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO TT_TORRENT(ID, NAME, DATA, IMAGE) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(ID) DO UPDATE SET NAME = excluded.NAME,
                 DATA = excluded.DATA, IMAGE = excluded.IMAGE",
            params![torrent.id, torrent.name, torrent.raw, torrent.image],
        )?;
        for file in files {
            conn.execute(
                "INSERT INTO TT_TORRENT_FILE(TORRENT, NAME) VALUES (?1, ?2)
                 ON CONFLICT(TORRENT, NAME) DO NOTHING",
                params![torrent.id, file],
            )?;
        }
        Ok(())
    }

    fn close(&self) {
        if let Err(e) = self.conn.lock().unwrap().execute_batch("PRAGMA optimize") {
            warn!(error = %e, "sqlite close");
        }
    }
}

fn row_to_torrent(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbTorrent> {
    let raw: Option<Vec<u8>> = row.get(2)?;
    let image: Option<Vec<u8>> = row.get(3)?;
    Ok(DbTorrent {
        id: row.get(0)?,
        name: row.get(1)?,
        raw: raw.unwrap_or_default(),
        image: image.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_torrent_keeps_id_stable() {
        let storage = SqliteStorage::in_memory().unwrap();
        let id = storage
            .add_torrent("A", b"v1", &["/A".to_string()])
            .unwrap();
        let again = storage
            .add_torrent("A", b"v2", &["/A".to_string(), "/A/y".to_string()])
            .unwrap();
        assert_eq!(id, again);
        assert_eq!(
            storage.torrent_files(id).unwrap(),
            vec!["/A".to_string(), "/A/y".to_string()]
        );
    }

    #[test]
    fn test_offset_defaults_to_zero() {
        let storage = SqliteStorage::in_memory().unwrap();
        assert_eq!(storage.crawl_offset().unwrap(), 0);
        storage.update_crawl_offset(42).unwrap();
        assert_eq!(storage.crawl_offset().unwrap(), 42);
    }

    #[test]
    fn test_image_replacement() {
        let storage = SqliteStorage::in_memory().unwrap();
        let id = storage.add_torrent("A", b"raw", &[]).unwrap();
        assert!(storage.torrent_image(id).unwrap().is_empty());
        storage.add_torrent_image(id, b"jpeg-1").unwrap();
        storage.add_torrent_image(id, b"jpeg-2").unwrap();
        assert_eq!(storage.torrent_image(id).unwrap(), b"jpeg-2");
    }
}
