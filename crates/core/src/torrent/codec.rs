use sha1::{Digest, Sha1};
use sha2::Sha256;

use super::bencode;
use super::{DecodeError, TorrentDescriptor};

/// Info-hashes computed over the raw bytes of the `info` sub-dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoHash {
    /// SHA-1 of the raw `info` bytes.
    pub v1: [u8; 20],
    /// SHA-256 of the same bytes, when requested.
    pub v2: Option<[u8; 32]>,
}

impl InfoHash {
    /// v2 truncated to v1 width.
    pub fn hybrid(&self) -> Option<[u8; 20]> {
        self.v2.map(|h| {
            let mut out = [0u8; 20];
            out.copy_from_slice(&h[..20]);
            out
        })
    }
}

/// Decode an upstream blob into a descriptor.
///
/// Returns `Ok(None)` when the payload is well-formed bencode but not a
/// torrent (no `length` and no `files` in `info`). The descriptor keeps the
/// input bytes verbatim in `raw`.
pub fn decode(data: &[u8]) -> Result<Option<TorrentDescriptor>, DecodeError> {
    let root = bencode::parse(data)?;
    if !root.is_dict() {
        return Err(DecodeError::NotADictionary);
    }
    let info = root.get("info").ok_or(DecodeError::MissingField("info"))?;
    let name = info
        .get("name")
        .and_then(|v| v.as_bytes())
        .ok_or(DecodeError::MissingField("name"))?;
    let name = String::from_utf8_lossy(name).into_owned();

    let mut descriptor = TorrentDescriptor::new(name);
    descriptor.raw = data.to_vec();

    if let Some(files) = info.get("files").and_then(|v| v.as_list()) {
        for file in files {
            let length = file
                .get("length")
                .and_then(|v| v.as_int())
                .ok_or(DecodeError::MissingField("length"))?;
            let path = file
                .get("path")
                .and_then(|v| v.as_list())
                .ok_or(DecodeError::MissingField("path"))?;
            let mut full = format!("/{}", descriptor.name);
            for part in path {
                let part = part.as_bytes().ok_or(DecodeError::MissingField("path"))?;
                full.push('/');
                full.push_str(&String::from_utf8_lossy(part));
            }
            descriptor.files.insert(full, true);
            descriptor.length += length.max(0) as u64;
        }
    } else if let Some(length) = info.get("length").and_then(|v| v.as_int()) {
        descriptor
            .files
            .insert(format!("/{}", descriptor.name), true);
        descriptor.length = length.max(0) as u64;
    } else {
        return Ok(None);
    }

    // length > 0 iff files is non-empty
    if descriptor.length == 0 {
        descriptor.files.clear();
    }

    Ok(Some(descriptor))
}

/// Compute the info-hash pair from the raw upstream bytes.
///
/// The digests run over the exact byte span the `info` dictionary occupied
/// upstream; nothing is re-encoded.
pub fn info_hash(data: &[u8], v2: bool) -> Result<InfoHash, DecodeError> {
    let root = bencode::parse(data)?;
    let info = root.get("info").ok_or(DecodeError::MissingField("info"))?;
    let raw_info = &data[info.span.clone()];

    let v1: [u8; 20] = Sha1::digest(raw_info).into();
    let v2 = v2.then(|| {
        let h: [u8; 32] = Sha256::digest(raw_info).into();
        h
    });
    Ok(InfoHash { v1, v2 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_file(name: &str, length: u64) -> Vec<u8> {
        format!(
            "d4:infod6:lengthi{length}e4:name{}:{name}12:piece lengthi16384eee",
            name.len()
        )
        .into_bytes()
    }

    #[test]
    fn test_decode_single_file() {
        let descriptor = decode(&single_file("A", 10)).unwrap().unwrap();
        assert_eq!(descriptor.name, "A");
        assert_eq!(descriptor.length, 10);
        assert_eq!(descriptor.files.len(), 1);
        assert_eq!(descriptor.files.get("/A"), Some(&true));
    }

    #[test]
    fn test_decode_multi_file() {
        let data = b"d4:infod5:filesld6:lengthi7e4:pathl1:xeed6:lengthi13e4:pathl3:sub1:yeee4:name3:Rel12:piece lengthi16384eee";
        let descriptor = decode(data).unwrap().unwrap();
        assert_eq!(descriptor.name, "Rel");
        assert_eq!(descriptor.length, 20);
        assert_eq!(
            descriptor.files.keys().collect::<Vec<_>>(),
            vec!["/Rel/sub/y", "/Rel/x"]
        );
        assert!(descriptor
            .files
            .keys()
            .all(|path| path.starts_with("/Rel/")));
    }

    #[test]
    fn test_decode_not_a_torrent() {
        // info dict with a name but neither length nor files
        let data = b"d4:infod4:name1:Aee";
        assert!(decode(data).unwrap().is_none());
    }

    #[test]
    fn test_decode_missing_name() {
        let data = b"d4:infod6:lengthi10eee";
        assert!(matches!(
            decode(data),
            Err(DecodeError::MissingField("name"))
        ));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode(b"not bencode"),
            Err(DecodeError::Bencode(_))
        ));
    }

    #[test]
    fn test_length_files_invariant() {
        let descriptor = decode(&single_file("A", 10)).unwrap().unwrap();
        assert_eq!(descriptor.length > 0, !descriptor.files.is_empty());

        let empty = decode(&single_file("Z", 0)).unwrap().unwrap();
        assert_eq!(empty.length, 0);
        assert!(empty.files.is_empty());
    }

    #[test]
    fn test_info_hash_ignores_outer_key_order() {
        // Same info dictionary, different outer dictionaries.
        let a = b"d8:announce3:url4:infod6:lengthi10e4:name1:Aee";
        let b = b"d4:infod6:lengthi10e4:name1:Ae3:zzzi1ee";
        let ha = info_hash(a, true).unwrap();
        let hb = info_hash(b, true).unwrap();
        assert_eq!(ha, hb);

        let expected: [u8; 20] = Sha1::digest(&b"d6:lengthi10e4:name1:Ae"[..]).into();
        assert_eq!(ha.v1, expected);
    }

    #[test]
    fn test_hybrid_hash_is_truncated_v2() {
        let data = single_file("A", 10);
        let hash = info_hash(&data, true).unwrap();
        let v2 = hash.v2.unwrap();
        assert_eq!(hash.hybrid().unwrap()[..], v2[..20]);
        assert!(info_hash(&data, false).unwrap().v2.is_none());
    }
}
