//! Hashing primitives for cache keys and file content.
//!
//! Two hashes serve two purposes. [`ContentHash`] is a fast, non-cryptographic
//! XXH3-128 hash used to derive storage keys (asset names, file-store file
//! names). [`FileDigest`] is a streamed SHA-256 digest of a file's bytes, used
//! to detect files that were touched but not modified.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Read buffer size used when streaming files through the digest.
const DIGEST_CHUNK: usize = 64 * 1024;

/// A 128-bit key hash computed using XXH3.
///
/// Used to turn arbitrary strings (asset names, store keys) into short,
/// filesystem-safe identifiers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Computes a key hash from a byte slice using XXH3-128.
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh3::xxh3_128(data);
        Self(hash.to_le_bytes())
    }

    /// Computes a key hash from a string.
    pub fn from_key(key: &str) -> Self {
        Self::from_bytes(key.as_bytes())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Hex-encoded SHA-256 digest of a file's content.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileDigest(String);

impl FileDigest {
    /// Digests an in-memory byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(data)))
    }

    /// Streams a reader through SHA-256 without buffering it whole.
    pub fn from_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; DIGEST_CHUNK];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    /// Streams the file at `path` through SHA-256.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Wraps a digest previously rendered with [`FileDigest::as_str`].
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Returns the hex rendering of the digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FileDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.0.get(..8).unwrap_or(&self.0);
        write!(f, "FileDigest({short}..)")
    }
}

/// What is known about a tracked file's content hash.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HashState {
    /// The digest has not been computed in this run.
    #[default]
    NotComputed,
    /// The file did not exist when it was hashed.
    Absent,
    /// The file's digest.
    Known(FileDigest),
}

impl HashState {
    /// Returns the digest if one is known.
    pub fn digest(&self) -> Option<&FileDigest> {
        match self {
            HashState::Known(d) => Some(d),
            _ => None,
        }
    }
}
