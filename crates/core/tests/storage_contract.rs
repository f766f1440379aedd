//! The storage contract, run against every local backend.

use std::collections::HashMap;

use trackwatch_core::storage::{
    DbTorrent, MemoryStorage, SledStorage, SqliteStorage, Storage, StorageError, INVALID_ID,
};

fn contract(storage: &dyn Storage) {
    // Crawl offset: missing means 0, updates round-trip.
    assert_eq!(storage.crawl_offset().unwrap(), 0);
    storage.update_crawl_offset(17).unwrap();
    assert_eq!(storage.crawl_offset().unwrap(), 17);

    // Chat pump offset.
    assert_eq!(storage.chat_offset().unwrap(), 0);
    storage.update_chat_offset(99).unwrap();
    assert_eq!(storage.chat_offset().unwrap(), 99);

    // Unknown torrent.
    assert_eq!(storage.torrent_id("absent").unwrap(), INVALID_ID);
    assert!(!storage.check_torrent(123).unwrap());

    // First insert allocates an id; re-insert keeps it while replacing the
    // payload and unioning files.
    let id = storage
        .add_torrent("Release", b"raw-v1", &["/Release/a".to_string()])
        .unwrap();
    assert!(id > 0);
    assert!(storage.check_torrent(id).unwrap());
    let again = storage
        .add_torrent(
            "Release",
            b"raw-v2",
            &["/Release/a".to_string(), "/Release/b".to_string()],
        )
        .unwrap();
    assert_eq!(id, again);
    let files = storage.torrent_files(id).unwrap();
    assert!(files.contains(&"/Release/a".to_string()));
    assert!(files.contains(&"/Release/b".to_string()));
    assert_eq!(files.len(), 2);

    // Ids are monotonic across names.
    let second = storage.add_torrent("Other", b"raw", &[]).unwrap();
    assert!(second > id);

    // Meta is a per-key upsert; reads are supersets of each write.
    let mut meta = HashMap::new();
    meta.insert("genre".to_string(), "ambient".to_string());
    meta.insert("year".to_string(), "2020".to_string());
    storage.add_torrent_meta(id, &meta).unwrap();
    let mut update = HashMap::new();
    update.insert("year".to_string(), "2021".to_string());
    storage.add_torrent_meta(id, &update).unwrap();
    let stored = storage.torrent_meta(id).unwrap();
    assert_eq!(stored.get("genre").map(String::as_str), Some("ambient"));
    assert_eq!(stored.get("year").map(String::as_str), Some("2021"));

    // Images are whole-value replacements.
    assert!(storage.torrent_image(id).unwrap().is_empty());
    storage.add_torrent_image(id, b"jpeg-1").unwrap();
    storage.add_torrent_image(id, b"jpeg-2").unwrap();
    assert_eq!(storage.torrent_image(id).unwrap(), b"jpeg-2");

    // Name search.
    let found = storage.find_torrents("%Rel%").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, id);
    assert_eq!(found[0].name, "Release");

    // Rosters: idempotent adds, removals, listings.
    storage.add_chat(7).unwrap();
    storage.add_chat(7).unwrap();
    storage.add_chat(-100).unwrap();
    assert!(storage.chat_exists(7).unwrap());
    assert!(!storage.chat_exists(8).unwrap());
    let chats = storage.chats().unwrap();
    assert_eq!(chats.len(), 2);
    assert!(chats.contains(&7) && chats.contains(&-100));
    storage.del_chat(7).unwrap();
    assert!(!storage.chat_exists(7).unwrap());

    storage.add_admin(42).unwrap();
    assert!(storage.admin_exists(42).unwrap());
    assert_eq!(storage.admins().unwrap(), vec![42]);
    storage.del_admin(42).unwrap();
    assert!(!storage.admin_exists(42).unwrap());
}

fn bulk_round_trip(storage: &dyn Storage) {
    let id = storage
        .add_torrent("Bulk", b"raw", &["/Bulk".to_string()])
        .unwrap();
    storage.add_torrent_image(id, b"img").unwrap();

    match storage.torrents() {
        Ok(torrents) => {
            let exported = torrents.iter().find(|t| t.name == "Bulk").unwrap();
            assert_eq!(exported.id, id);
            assert_eq!(exported.raw, b"raw");
            assert_eq!(exported.image, b"img");
        }
        Err(StorageError::Unsupported) => return,
        Err(e) => panic!("bulk export failed: {e}"),
    }

    // Import into a fresh memory backend keeps the id.
    let dest = MemoryStorage::new();
    dest.put_torrent(
        &DbTorrent {
            id,
            name: "Bulk".to_string(),
            raw: b"raw".to_vec(),
            image: b"img".to_vec(),
        },
        &["/Bulk".to_string()],
    )
    .unwrap();
    assert_eq!(dest.torrent_id("Bulk").unwrap(), id);
    assert_eq!(dest.torrent_image(id).unwrap(), b"img");
    assert_eq!(dest.torrent_files(id).unwrap(), vec!["/Bulk".to_string()]);

    // Fresh inserts after an import never reuse the imported id.
    let fresh = dest.add_torrent("After", b"x", &[]).unwrap();
    assert!(fresh > id);
}

#[test]
fn memory_backend_contract() {
    let storage = MemoryStorage::new();
    contract(&storage);
    bulk_round_trip(&MemoryStorage::new());
}

#[test]
fn sqlite_backend_contract() {
    let storage = SqliteStorage::in_memory().unwrap();
    contract(&storage);
    bulk_round_trip(&SqliteStorage::in_memory().unwrap());
}

#[test]
fn sled_backend_contract() {
    let dir = tempfile::tempdir().unwrap();
    let storage = SledStorage::open(dir.path().join("db").to_str().unwrap()).unwrap();
    contract(&storage);

    let dir2 = tempfile::tempdir().unwrap();
    let storage2 = SledStorage::open(dir2.path().join("db").to_str().unwrap()).unwrap();
    bulk_round_trip(&storage2);
}

#[test]
fn sled_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let path = path.to_str().unwrap();

    let id = {
        let storage = SledStorage::open(path).unwrap();
        storage.update_crawl_offset(5).unwrap();
        let id = storage
            .add_torrent("Persist", b"raw", &["/Persist".to_string()])
            .unwrap();
        storage.close();
        id
    };

    let storage = SledStorage::open(path).unwrap();
    assert_eq!(storage.crawl_offset().unwrap(), 5);
    assert_eq!(storage.torrent_id("Persist").unwrap(), id);
    assert_eq!(
        storage.torrent_files(id).unwrap(),
        vec!["/Persist".to_string()]
    );
}
