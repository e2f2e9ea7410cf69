//! Error types for cache operations.

use std::io;
use std::path::PathBuf;

use kiln_config::ConfigError;

/// Errors that can occur during cache operations.
///
/// Only store and tracked-file I/O surface as errors. Malformed persisted
/// records are logged and treated as misses by the loaders, so they never
/// reach callers through this type.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// The embedded database backing a store failed.
    #[error("cache database error at {path}: {reason}")]
    Backend {
        /// The database directory.
        path: PathBuf,
        /// Description of the backend failure.
        reason: String,
    },

    /// A file-store entry has an invalid or missing header.
    #[error("invalid cache entry header in {path}: {reason}")]
    InvalidHeader {
        /// The entry file path.
        path: PathBuf,
        /// Description of the header problem.
        reason: String,
    },

    /// The stored checksum does not match the computed checksum of the payload.
    #[error("checksum mismatch in {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The entry file path.
        path: PathBuf,
        /// The expected checksum from the header.
        expected: String,
        /// The actual checksum computed from the payload.
        actual: String,
    },

    /// The entry format version does not match the current version.
    #[error("version mismatch in {path}: expected {expected}, got {actual}")]
    VersionMismatch {
        /// The entry file path.
        path: PathBuf,
        /// The expected format version.
        expected: u32,
        /// The actual format version found in the file.
        actual: u32,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// The cache configuration could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serialization(reason: impl ToString) -> Self {
        CacheError::Serialization {
            reason: reason.to_string(),
        }
    }

    /// Returns `true` if this error means "the store does not exist yet".
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}
