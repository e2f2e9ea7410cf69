//! Per-file modification timestamps and content digests.
//!
//! A scan stats and hashes every tracked file in parallel and replaces the
//! tracker's state wholesale. Queries afterwards are pure lookups.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use kiln_common::{FileDigest, FileTimestamp, HashState};
use rayon::prelude::*;

use crate::error::CacheError;

/// Timestamps and content hashes of the tracked file set.
#[derive(Debug, Default)]
pub struct FileChangeTracker {
    timestamps: HashMap<PathBuf, FileTimestamp>,
    hashes: HashMap<PathBuf, HashState>,
}

impl FileChangeTracker {
    /// Creates an empty tracker; every file's freshness is unknown.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stats and hashes every file in `files`.
    ///
    /// Stat and hash of each file run as independent tasks. A missing file is
    /// recorded as absent; any other I/O error aborts the scan and leaves the
    /// previous state untouched.
    pub fn scan(&mut self, files: &[PathBuf]) -> Result<(), CacheError> {
        let results: Vec<(PathBuf, FileTimestamp, HashState)> = files
            .par_iter()
            .map(|path| {
                let (ts, hash) = rayon::join(|| stat_file(path), || hash_file(path));
                Ok((path.clone(), ts?, hash?))
            })
            .collect::<Result<_, CacheError>>()?;

        let mut timestamps = HashMap::with_capacity(results.len());
        let mut hashes = HashMap::with_capacity(results.len());
        for (path, ts, hash) in results {
            timestamps.insert(path.clone(), ts);
            hashes.insert(path, hash);
        }
        self.timestamps = timestamps;
        self.hashes = hashes;
        Ok(())
    }

    /// The timestamp from the latest scan, or `None` if unknown.
    pub fn timestamp(&self, path: &Path) -> Option<FileTimestamp> {
        self.timestamps.get(path).copied()
    }

    /// The content hash from the latest scan.
    pub fn hash(&self, path: &Path) -> HashState {
        self.hashes.get(path).cloned().unwrap_or_default()
    }

    /// All timestamps from the latest scan.
    pub fn timestamps(&self) -> &HashMap<PathBuf, FileTimestamp> {
        &self.timestamps
    }

    /// Returns `true` if `path` changed after `recorded`.
    ///
    /// Unknown and absent files count as changed.
    pub fn has_changed_since(&self, path: &Path, recorded: u64) -> bool {
        self.timestamp(path)
            .map_or(true, |ts| ts.is_newer_than(recorded))
    }

    /// Number of tracked files.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Returns `true` if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Forgets every timestamp and hash.
    pub fn clear(&mut self) {
        self.timestamps.clear();
        self.hashes.clear();
    }

    /// Digest of `path` as of a module built at `built_at`, if the file has
    /// settled.
    ///
    /// The file is re-stat'ed. A file modified after the build yields `None`,
    /// since its content may not be what the build saw. The scan digest is
    /// reused when the modification time is unchanged since the scan;
    /// otherwise the file is hashed again.
    pub fn settled_digest(&self, path: &Path, built_at: u64) -> Result<Option<FileDigest>, CacheError> {
        let now = match stat_file(path)? {
            FileTimestamp::Absent => return Ok(None),
            ts @ FileTimestamp::Modified(_) => ts,
        };
        if now.is_newer_than(built_at) {
            return Ok(None);
        }
        if self.timestamp(path) == Some(now) {
            if let HashState::Known(digest) = self.hash(path) {
                return Ok(Some(digest));
            }
        }
        Ok(hash_file(path)?.digest().cloned())
    }
}

/// Stats `path`. A missing file is [`FileTimestamp::Absent`].
///
/// Platforms without modification times report the file as modified at the
/// end of time, so it always looks changed.
pub fn stat_file(path: &Path) -> Result<FileTimestamp, CacheError> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta
            .modified()
            .map(FileTimestamp::from_system_time)
            .unwrap_or(FileTimestamp::Modified(u64::MAX))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FileTimestamp::Absent),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

/// Streams `path` through SHA-256. A missing file is [`HashState::Absent`].
pub fn hash_file(path: &Path) -> Result<HashState, CacheError> {
    match FileDigest::from_file(path) {
        Ok(digest) => Ok(HashState::Known(digest)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HashState::Absent),
        Err(e) => Err(CacheError::io(path, e)),
    }
}
