//! Embedded ordered key-value database store.
//!
//! Backed by one `sled` database per store directory. Batches are applied as
//! a single atomic `sled::Batch` and flushed before `write` returns.

use std::path::{Path, PathBuf};

use super::{CacheStore, StoreOp, StoreSnapshot};
use crate::error::CacheError;

/// Store backed by an embedded `sled` database.
pub struct DbStore {
    path: PathBuf,
    db: sled::Db,
}

impl DbStore {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            super::ensure_dir(parent)?;
        }
        let db = sled::open(path).map_err(|e| CacheError::Backend {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            db,
        })
    }

    fn backend(&self, e: sled::Error) -> CacheError {
        CacheError::Backend {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

impl CacheStore for DbStore {
    fn read(&self) -> Result<StoreSnapshot, CacheError> {
        let mut snapshot = StoreSnapshot::new();
        for item in self.db.iter() {
            let (key, value) = item.map_err(|e| self.backend(e))?;
            match String::from_utf8(key.to_vec()) {
                Ok(key) => {
                    snapshot.insert(key, value.to_vec());
                }
                Err(_) => log::warn!(
                    "skipping non-UTF-8 key in cache database {}",
                    self.path.display()
                ),
            }
        }
        Ok(snapshot)
    }

    fn write(&self, batch: &[StoreOp]) -> Result<(), CacheError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut ops = sled::Batch::default();
        for op in batch {
            match &op.value {
                Some(value) => ops.insert(op.key.as_bytes(), value.as_slice()),
                None => ops.remove(op.key.as_bytes()),
            }
        }
        self.db.apply_batch(ops).map_err(|e| self.backend(e))?;
        self.db.flush().map_err(|e| self.backend(e))?;
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.db.clear().map_err(|e| self.backend(e))?;
        self.db.flush().map_err(|e| self.backend(e))?;
        Ok(())
    }

    fn location(&self) -> &Path {
        &self.path
    }
}
