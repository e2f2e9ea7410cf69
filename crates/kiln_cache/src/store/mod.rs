//! Pluggable key/value persistence for the cache tiers.
//!
//! Every tier is backed by one [`CacheStore`]. A store loads its whole
//! contents with [`CacheStore::read`] and persists a batch of upserts and
//! deletions with [`CacheStore::write`]; a `None` value in a batch is a
//! tombstone and the key is gone on the next read.
//!
//! ```text
//! Tier state (typed records)
//!     ↓  encode / decode
//! CacheStore (string keys, byte values)
//!     ↓
//! FileStore | DbStore | SnapshotStore
//! ```

pub mod db;
pub mod file;
pub mod snapshot;

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::CacheError;

pub use db::DbStore;
pub use file::FileStore;
pub use snapshot::SnapshotStore;

/// Everything a store holds, keyed by the caller's keys.
pub type StoreSnapshot = BTreeMap<String, Vec<u8>>;

/// One entry of a write batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOp {
    /// The entry key.
    pub key: String,
    /// The new value, or `None` to delete the key.
    pub value: Option<Vec<u8>>,
}

impl StoreOp {
    /// An upsert.
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// A tombstone.
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }
}

/// Key/value persistence used by one cache tier.
pub trait CacheStore: Send + Sync {
    /// Loads the entire store. A store that does not exist yet reads as empty.
    fn read(&self) -> Result<StoreSnapshot, CacheError>;

    /// Persists a batch of upserts and tombstones.
    fn write(&self, batch: &[StoreOp]) -> Result<(), CacheError>;

    /// Removes every entry.
    fn clear(&self) -> Result<(), CacheError>;

    /// Where the store lives on disk.
    fn location(&self) -> &Path;
}

/// Which backend a tier uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// One file per key under a directory.
    Files,
    /// Embedded ordered key-value database.
    Database,
    /// A single JSON document holding every entry.
    Snapshot,
}

/// Creates a store of the given kind rooted at `path`.
pub fn open_store(kind: StoreKind, path: &Path) -> Result<Box<dyn CacheStore>, CacheError> {
    Ok(match kind {
        StoreKind::Files => Box::new(FileStore::open(path)?),
        StoreKind::Database => Box::new(DbStore::open(path)?),
        StoreKind::Snapshot => Box::new(SnapshotStore::open(path)?),
    })
}

/// Writes `bytes` to `path` through a sibling temporary file and a rename, so
/// a crash never leaves a truncated `path` behind.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp).map_err(|e| CacheError::io(&tmp, e))?;
    file.write_all(bytes).map_err(|e| CacheError::io(&tmp, e))?;
    file.sync_all().map_err(|e| CacheError::io(&tmp, e))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|e| CacheError::io(path, e))
}

/// Creates `dir` and its parents.
pub(crate) fn ensure_dir(dir: &Path) -> Result<(), CacheError> {
    fs::create_dir_all(dir).map_err(|e| CacheError::io(dir, e))
}
