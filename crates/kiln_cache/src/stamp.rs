//! The fingerprint gate deciding whether a persisted cache can be trusted.
//!
//! A stamp is the environment fingerprint followed by the configuration hash
//! (when the hash is not already part of the cache directory). It is compared
//! with the stamp persisted by the previous run; any difference resets every
//! tier.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use kiln_common::{FileDigest, FileTimestamp};
use kiln_config::{EnvironmentInputs, ResolvedConfig};
use sha2::{Digest, Sha256};

use crate::error::CacheError;
use crate::store::write_atomic;

/// File name of the persisted stamp under the cache root.
pub const STAMP_FILE: &str = "stamp";

/// Fingerprint of environment and configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stamp(String);

impl Stamp {
    /// Wraps a stamp string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The stamp text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the empty stamp.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of comparing the current stamp with the persisted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Both stamps are non-empty and equal; the cache is trusted.
    Valid,
    /// No previous stamp; nothing to trust yet.
    FirstRun,
    /// Both stamps are non-empty and differ.
    EnvironmentChanged,
    /// A previous stamp exists but fingerprinting produced an empty stamp.
    Unstamped,
}

impl GateOutcome {
    /// Returns `true` if the persisted tiers may be loaded.
    pub fn is_valid(self) -> bool {
        self == GateOutcome::Valid
    }
}

/// Returns `true` iff both stamps are non-empty and equal.
pub fn is_valid(current: &Stamp, previous: &Stamp) -> bool {
    !current.is_empty() && !previous.is_empty() && current == previous
}

/// Classifies a stamp comparison.
pub fn classify(current: &Stamp, previous: &Stamp) -> GateOutcome {
    if is_valid(current, previous) {
        GateOutcome::Valid
    } else if previous.is_empty() {
        GateOutcome::FirstRun
    } else if current.is_empty() {
        GateOutcome::Unstamped
    } else {
        GateOutcome::EnvironmentChanged
    }
}

/// Classifies a stamp comparison and logs the notice that goes with it.
pub fn check(current: &Stamp, previous: &Stamp) -> GateOutcome {
    let outcome = classify(current, previous);
    match outcome {
        GateOutcome::Valid => log::debug!("cache stamp {current} matches"),
        GateOutcome::FirstRun => log::debug!("no previous cache stamp, starting empty"),
        GateOutcome::Unstamped => log::debug!("cache stamp is empty, starting empty"),
        GateOutcome::EnvironmentChanged => log::warn!(
            "environment or configuration changed (stamp {previous} -> {current}), resetting the cache"
        ),
    }
    outcome
}

/// Computes the stamp for a resolved configuration.
///
/// With environment fingerprinting disabled the environment contribution is
/// empty. The config hash is appended after an `_` only when it is not part
/// of the cache directory.
pub fn compute_stamp(config: &ResolvedConfig) -> Result<Stamp, CacheError> {
    let env = match &config.environment {
        Some(inputs) => environment_hash(inputs)?,
        None => String::new(),
    };
    Ok(match config.stamp_suffix() {
        Some(suffix) => Stamp(format!("{env}_{suffix}")),
        None => Stamp(env),
    })
}

/// Hashes the environment inputs.
///
/// Each listed file contributes its content digest (or `missing`); each
/// listed directory contributes the sorted names and modification times of
/// its immediate entries. Only "not found" is tolerated.
pub fn environment_hash(inputs: &EnvironmentInputs) -> Result<String, CacheError> {
    let root = inputs.root.as_deref().unwrap_or_else(|| Path::new("."));
    let mut hasher = Sha256::new();

    for name in &inputs.files {
        let path = root.join(name);
        hasher.update(b"file\0");
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        match FileDigest::from_file(&path) {
            Ok(digest) => hasher.update(digest.as_str().as_bytes()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => hasher.update(b"missing"),
            Err(e) => return Err(CacheError::io(path, e)),
        }
        hasher.update(b"\n");
    }

    for name in &inputs.directories {
        let path = root.join(name);
        hasher.update(b"dir\0");
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
        for (entry, modified) in directory_listing(&path)? {
            hasher.update(entry.as_bytes());
            hasher.update(b"\0");
            match modified {
                FileTimestamp::Modified(ms) => hasher.update(ms.to_string().as_bytes()),
                FileTimestamp::Absent => hasher.update(b"missing"),
            }
            hasher.update(b"\n");
        }
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn directory_listing(dir: &Path) -> Result<Vec<(String, FileTimestamp)>, CacheError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CacheError::io(dir, e)),
    };

    let mut listing = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CacheError::io(dir, e))?;
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(time) => FileTimestamp::from_system_time(time),
            Err(e) if e.kind() == io::ErrorKind::NotFound => FileTimestamp::Absent,
            Err(e) => return Err(CacheError::io(entry.path(), e)),
        };
        listing.push((entry.file_name().to_string_lossy().into_owned(), modified));
    }
    listing.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(listing)
}

/// Reads the persisted stamp. A missing stamp file reads as the empty stamp.
pub fn read_stamp(cache_root: &Path) -> Result<Stamp, CacheError> {
    let path = cache_root.join(STAMP_FILE);
    match fs::read_to_string(&path) {
        Ok(text) => Ok(Stamp(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Stamp::default()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

/// Persists `stamp` under the cache root.
pub fn write_stamp(cache_root: &Path, stamp: &Stamp) -> Result<(), CacheError> {
    crate::store::ensure_dir(cache_root)?;
    write_atomic(&cache_root.join(STAMP_FILE), stamp.as_str().as_bytes())
}
