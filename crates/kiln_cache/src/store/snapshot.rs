//! Single-document JSON store.
//!
//! Holds every entry in one JSON object. Values must themselves be JSON text;
//! they are embedded as nested JSON so the document stays readable. Writes
//! merge the batch into the current document and replace the file through a
//! temporary file and a rename.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{ensure_dir, write_atomic, CacheStore, StoreOp, StoreSnapshot};
use crate::error::CacheError;

/// Store keeping all entries in a single JSON file.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Opens the store, creating the parent directory of its file.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn load_document(&self) -> Result<BTreeMap<String, serde_json::Value>, CacheError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(CacheError::io(&self.path, e)),
        };
        match serde_json::from_str(&text) {
            Ok(doc) => Ok(doc),
            Err(e) => {
                log::warn!(
                    "discarding unreadable cache snapshot {}: {e}",
                    self.path.display()
                );
                Ok(BTreeMap::new())
            }
        }
    }
}

impl CacheStore for SnapshotStore {
    fn read(&self) -> Result<StoreSnapshot, CacheError> {
        self.load_document()?
            .into_iter()
            .map(|(key, value)| {
                serde_json::to_vec(&value)
                    .map(|bytes| (key, bytes))
                    .map_err(CacheError::serialization)
            })
            .collect()
    }

    fn write(&self, batch: &[StoreOp]) -> Result<(), CacheError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut doc = self.load_document()?;
        for op in batch {
            match &op.value {
                Some(value) => {
                    let value: serde_json::Value =
                        serde_json::from_slice(value).map_err(CacheError::serialization)?;
                    doc.insert(op.key.clone(), value);
                }
                None => {
                    doc.remove(&op.key);
                }
            }
        }
        let bytes = serde_json::to_vec(&doc).map_err(CacheError::serialization)?;
        write_atomic(&self.path, &bytes)
    }

    fn clear(&self) -> Result<(), CacheError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(&self.path, e)),
        }
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, SnapshotStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(&dir.path().join("resolve.json")).unwrap();
        (dir, store)
    }

    #[test]
    fn missing_file_reads_empty() {
        let (_dir, store) = make_store();
        assert!(store.read().unwrap().is_empty());
    }

    #[test]
    fn values_are_nested_json() {
        let (_dir, store) = make_store();
        store
            .write(&[StoreOp::put("[\"/src\",\"./a\"]", r#"{"userRequest":"/src/a.js"}"#)])
            .unwrap();
        let raw = fs::read_to_string(store.location()).unwrap();
        assert!(raw.contains(r#""userRequest":"/src/a.js""#));
    }

    #[test]
    fn batches_merge() {
        let (_dir, store) = make_store();
        store.write(&[StoreOp::put("a", "1")]).unwrap();
        store.write(&[StoreOp::put("b", "2")]).unwrap();
        assert_eq!(store.read().unwrap().len(), 2);
    }

    #[test]
    fn non_json_value_is_rejected() {
        let (_dir, store) = make_store();
        let err = store.write(&[StoreOp::put("a", "not json")]).unwrap_err();
        assert!(matches!(err, CacheError::Serialization { .. }));
    }

    #[test]
    fn corrupt_document_reads_empty() {
        let (_dir, store) = make_store();
        fs::write(store.location(), "{ truncated").unwrap();
        assert!(store.read().unwrap().is_empty());
    }

    #[test]
    fn clear_removes_file() {
        let (_dir, store) = make_store();
        store.write(&[StoreOp::put("a", "1")]).unwrap();
        store.clear().unwrap();
        assert!(!store.location().exists());
        store.clear().unwrap();
    }
}
