//! Hand-built bencode payloads and descriptors for tests.

use crate::torrent::{self, TorrentDescriptor};

/// Bencoded single-file torrent.
pub fn single_file_raw(name: &str, length: u64) -> Vec<u8> {
    format!(
        "d4:infod6:lengthi{length}e4:name{}:{name}12:piece lengthi16384eee",
        name.len()
    )
    .into_bytes()
}

/// Bencoded multi-file torrent; paths are single-component file names.
pub fn multi_file_raw(name: &str, files: &[(&str, u64)]) -> Vec<u8> {
    let mut out = String::from("d4:infod5:filesl");
    for (file, length) in files {
        out.push_str(&format!(
            "d6:lengthi{length}e4:pathl{}:{file}ee",
            file.len()
        ));
    }
    out.push_str(&format!("e4:name{}:{name}", name.len()));
    out.push_str("12:piece lengthi16384eee");
    out.into_bytes()
}

/// Decoded descriptor for a single-file torrent.
pub fn single_file(name: &str, length: u64) -> TorrentDescriptor {
    torrent::decode(&single_file_raw(name, length))
        .expect("fixture decodes")
        .expect("fixture is a torrent")
}

/// Decoded descriptor for a multi-file torrent.
pub fn multi_file(name: &str, files: &[(&str, u64)]) -> TorrentDescriptor {
    torrent::decode(&multi_file_raw(name, files))
        .expect("fixture decodes")
        .expect("fixture is a torrent")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_shapes() {
        let single = single_file("A", 10);
        assert_eq!(single.length, 10);
        assert_eq!(single.files.len(), 1);

        let multi = multi_file("R", &[("x", 7), ("y", 13)]);
        assert_eq!(multi.length, 20);
        assert!(multi.files.contains_key("/R/x"));
        assert!(multi.files.contains_key("/R/y"));
    }
}
