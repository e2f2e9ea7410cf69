//! Directory-of-files store for large blobs.
//!
//! Each key is stored as `<dir>/<xxh3(key)>.entry`. The file starts with a
//! 4-byte little-endian header length, then a bincode header holding magic
//! bytes, the format version, the original key, and a checksum of the
//! payload, then the payload itself. Entries whose header or checksum fail
//! validation are skipped on read and count as misses.

use std::fs;
use std::path::{Path, PathBuf};

use kiln_common::ContentHash;
use serde::{Deserialize, Serialize};

use super::{ensure_dir, write_atomic, CacheStore, StoreOp, StoreSnapshot};
use crate::error::CacheError;

/// Magic bytes identifying a kiln file-store entry.
const ENTRY_MAGIC: [u8; 4] = *b"KILN";

/// Current entry format version.
const ENTRY_FORMAT_VERSION: u32 = 1;

/// File extension of committed entries.
const ENTRY_EXT: &str = "entry";

/// Header prepended to every entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryHeader {
    magic: [u8; 4],
    format_version: u32,
    key: String,
    checksum: ContentHash,
}

/// Store keeping one file per key under a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens the store, creating its directory.
    pub fn open(dir: &Path) -> Result<Self, CacheError> {
        ensure_dir(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Returns the file path holding `key`.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{ENTRY_EXT}", ContentHash::from_key(key)))
    }

    fn encode(key: &str, payload: &[u8]) -> Result<Vec<u8>, CacheError> {
        let header = EntryHeader {
            magic: ENTRY_MAGIC,
            format_version: ENTRY_FORMAT_VERSION,
            key: key.to_string(),
            checksum: ContentHash::from_bytes(payload),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(CacheError::serialization)?;

        let header_len = header_bytes.len() as u32;
        let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
        output.extend_from_slice(&header_len.to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(payload);
        Ok(output)
    }

    /// Decodes an entry file into its key and payload.
    fn decode(path: &Path, raw: &[u8]) -> Result<(String, Vec<u8>), CacheError> {
        let invalid = |reason: &str| CacheError::InvalidHeader {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let len_bytes: [u8; 4] = raw
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| invalid("truncated header length"))?;
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        let header_bytes = raw
            .get(4..4 + header_len)
            .ok_or_else(|| invalid("truncated header"))?;

        let (header, _): (EntryHeader, usize) =
            bincode::serde::decode_from_slice(header_bytes, bincode::config::standard())
                .map_err(|e| invalid(&e.to_string()))?;

        if header.magic != ENTRY_MAGIC {
            return Err(invalid("bad magic bytes"));
        }
        if header.format_version != ENTRY_FORMAT_VERSION {
            return Err(CacheError::VersionMismatch {
                path: path.to_path_buf(),
                expected: ENTRY_FORMAT_VERSION,
                actual: header.format_version,
            });
        }

        let payload = &raw[4 + header_len..];
        let actual = ContentHash::from_bytes(payload);
        if actual != header.checksum {
            return Err(CacheError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected: header.checksum.to_string(),
                actual: actual.to_string(),
            });
        }

        Ok((header.key, payload.to_vec()))
    }
}

impl CacheStore for FileStore {
    fn read(&self) -> Result<StoreSnapshot, CacheError> {
        let mut snapshot = StoreSnapshot::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(snapshot),
            Err(e) => return Err(CacheError::io(&self.dir, e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(&self.dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            let raw = fs::read(&path).map_err(|e| CacheError::io(&path, e))?;
            match Self::decode(&path, &raw) {
                Ok((key, payload)) => {
                    snapshot.insert(key, payload);
                }
                Err(e) => log::warn!("skipping unreadable cache entry: {e}"),
            }
        }
        Ok(snapshot)
    }

    fn write(&self, batch: &[StoreOp]) -> Result<(), CacheError> {
        if batch.is_empty() {
            return Ok(());
        }
        ensure_dir(&self.dir)?;
        for op in batch {
            let path = self.entry_path(&op.key);
            match &op.value {
                Some(value) => write_atomic(&path, &Self::encode(&op.key, value)?)?,
                None => match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(CacheError::io(&path, e)),
                },
            }
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io(&self.dir, e)),
        }
        ensure_dir(&self.dir)
    }

    fn location(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(&dir.path().join("assets")).unwrap();
        (dir, store)
    }

    #[test]
    fn write_and_read_roundtrip() {
        let (_dir, store) = make_store();
        store
            .write(&[StoreOp::put("main.css", b"body{}".to_vec())])
            .unwrap();
        let snapshot = store.read().unwrap();
        assert_eq!(snapshot["main.css"], b"body{}");
    }

    #[test]
    fn read_missing_directory_is_empty() {
        let (_dir, store) = make_store();
        fs::remove_dir_all(store.location()).unwrap();
        assert!(store.read().unwrap().is_empty());
    }

    #[test]
    fn write_recreates_directory() {
        let (_dir, store) = make_store();
        fs::remove_dir_all(store.location()).unwrap();
        store.write(&[StoreOp::put("k", "v")]).unwrap();
        assert_eq!(store.read().unwrap().len(), 1);
    }

    #[test]
    fn tombstone_removes_entry() {
        let (_dir, store) = make_store();
        store.write(&[StoreOp::put("k", "v")]).unwrap();
        store.write(&[StoreOp::delete("k"), StoreOp::delete("never")]).unwrap();
        assert!(store.read().unwrap().is_empty());
        assert!(!store.entry_path("k").exists());
    }

    #[test]
    fn keys_with_separators_are_safe() {
        let (_dir, store) = make_store();
        let key = "../../etc/passwd";
        store.write(&[StoreOp::put(key, "x")]).unwrap();
        assert!(store.entry_path(key).starts_with(store.location()));
        assert_eq!(store.read().unwrap()[key], b"x");
    }

    #[test]
    fn corrupt_entry_is_skipped() {
        let (_dir, store) = make_store();
        store.write(&[StoreOp::put("good", "1")]).unwrap();
        fs::write(store.entry_path("bad"), b"garbage data").unwrap();
        let snapshot = store.read().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("good"));
    }

    #[test]
    fn truncated_entry_is_skipped() {
        let (_dir, store) = make_store();
        fs::write(store.entry_path("short"), b"AB").unwrap();
        assert!(store.read().unwrap().is_empty());
    }

    #[test]
    fn tampered_payload_fails_checksum() {
        let (_dir, store) = make_store();
        store.write(&[StoreOp::put("k", "payload")]).unwrap();
        let path = store.entry_path("k");
        let mut raw = fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let err = FileStore::decode(&path, &raw).unwrap_err();
        assert!(matches!(err, CacheError::ChecksumMismatch { .. }));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let header = EntryHeader {
            magic: ENTRY_MAGIC,
            format_version: 999,
            key: "k".to_string(),
            checksum: ContentHash::from_bytes(b"data"),
        };
        let header_bytes =
            bincode::serde::encode_to_vec(&header, bincode::config::standard()).unwrap();
        let mut raw = (header_bytes.len() as u32).to_le_bytes().to_vec();
        raw.extend_from_slice(&header_bytes);
        raw.extend_from_slice(b"data");
        let err = FileStore::decode(Path::new("x.entry"), &raw).unwrap_err();
        assert!(matches!(err, CacheError::VersionMismatch { actual: 999, .. }));
    }

    #[test]
    fn stray_temp_files_are_ignored() {
        let (_dir, store) = make_store();
        fs::write(store.location().join("abc.entry.tmp"), b"partial").unwrap();
        assert!(store.read().unwrap().is_empty());
    }

    #[test]
    fn clear_empties_store() {
        let (_dir, store) = make_store();
        store.write(&[StoreOp::put("a", "1"), StoreOp::put("b", "2")]).unwrap();
        store.clear().unwrap();
        assert!(store.read().unwrap().is_empty());
        assert!(store.location().exists());
    }

    #[test]
    fn large_payload() {
        let (_dir, store) = make_store();
        let data: Vec<u8> = (0..100_000).map(|i| (i % 256) as u8).collect();
        store.write(&[StoreOp::put("big", data.clone())]).unwrap();
        assert_eq!(store.read().unwrap()["big"], data);
    }
}
