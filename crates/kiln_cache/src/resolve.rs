//! Cache of `(context, request)` resolutions.
//!
//! A hit is trusted while the resolved file exists. Resolutions are
//! independent of build content, so no rebuild decision is involved.

use std::collections::{BTreeMap, BTreeSet};

use kiln_common::FileTimestamp;

use crate::error::CacheError;
use crate::records::ResolutionRecord;
use crate::store::StoreOp;
use crate::tracker::{stat_file, FileChangeTracker};

/// Deterministic key of a resolution: the JSON array `[context, request]`.
pub fn resolution_key(context: &str, request: &str) -> String {
    // Serializing two strings cannot fail.
    serde_json::to_string(&[context, request]).unwrap_or_else(|_| format!("{context}\0{request}"))
}

/// What the host's resolver produced.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The persistable part of the result.
    pub record: ResolutionRecord,
    /// The target is virtual (generated in memory) and must not be cached.
    pub synthetic: bool,
}

/// Where a resolution came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    /// A still-valid cached record.
    Cached(ResolutionRecord),
    /// A fresh result from the resolver.
    Fresh(ResolutionRecord),
}

impl ResolveOutcome {
    /// The resolution record, wherever it came from.
    pub fn record(&self) -> &ResolutionRecord {
        match self {
            ResolveOutcome::Cached(r) | ResolveOutcome::Fresh(r) => r,
        }
    }

    /// Returns `true` for a cache hit.
    pub fn is_cached(&self) -> bool {
        matches!(self, ResolveOutcome::Cached(_))
    }
}

/// In-memory resolution tier with the keys changed since it was loaded.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    entries: BTreeMap<String, ResolutionRecord>,
    dirty: BTreeSet<String>,
}

impl ResolutionCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps records loaded from disk.
    pub fn from_entries(entries: BTreeMap<String, ResolutionRecord>) -> Self {
        Self {
            entries,
            dirty: BTreeSet::new(),
        }
    }

    /// All records, keyed by [`resolution_key`].
    pub fn entries(&self) -> &BTreeMap<String, ResolutionRecord> {
        &self.entries
    }

    /// Number of cached resolutions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves `request` from `context`, consulting the cache first.
    ///
    /// A hit is returned when the resolved file is known to exist, or, when
    /// its freshness is unknown, exists now. Otherwise `resolver` runs and
    /// its result is stored unless it is synthetic. Resolver errors are
    /// passed through and nothing is stored.
    pub fn resolve<E>(
        &mut self,
        context: &str,
        request: &str,
        files: &FileChangeTracker,
        resolver: impl FnOnce() -> Result<Resolution, E>,
    ) -> Result<ResolveOutcome, E> {
        let key = resolution_key(context, request);
        if let Some(hit) = self.entries.get(&key) {
            let exists = match files.timestamp(&hit.user_request) {
                Some(ts) => ts.exists(),
                None => matches!(stat_file(&hit.user_request), Ok(FileTimestamp::Modified(_))),
            };
            if exists {
                return Ok(ResolveOutcome::Cached(hit.clone()));
            }
            log::debug!("resolution {key} points at a missing file");
        }

        let resolution = resolver()?;
        if !resolution.synthetic {
            self.entries.insert(key.clone(), resolution.record.clone());
            self.dirty.insert(key);
        }
        Ok(ResolveOutcome::Fresh(resolution.record))
    }

    /// Write batch for every record changed since the last drain.
    pub fn drain_ops(&mut self) -> Result<Vec<StoreOp>, CacheError> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .map(|key| match self.entries.get(&key) {
                Some(record) => serde_json::to_vec(record)
                    .map(|bytes| StoreOp::put(key, bytes))
                    .map_err(CacheError::serialization),
                None => Ok(StoreOp::delete(key)),
            })
            .collect()
    }

    /// Drops every record.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.dirty.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::fs;
    use std::path::{Path, PathBuf};

    fn resolved(target: &Path, synthetic: bool) -> Resolution {
        Resolution {
            record: ResolutionRecord {
                context: "/p".into(),
                request: "./x".into(),
                user_request: target.to_path_buf(),
                resource: None,
                loaders: Vec::new(),
                resolver_meta: serde_json::json!({ "descriptionFileRoot": "/p" }),
                parser_options: serde_json::Value::Null,
            },
            synthetic,
        }
    }

    #[test]
    fn key_is_json_pair() {
        assert_eq!(resolution_key("/p", "./x"), r#"["/p","./x"]"#);
    }

    #[test]
    fn hit_on_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("x.js");
        fs::write(&target, "x").unwrap();
        let mut tracker = FileChangeTracker::new();
        tracker.scan(&[target.clone()]).unwrap();

        let mut cache = ResolutionCache::new();
        let first = cache
            .resolve("/p", "./x", &tracker, || Ok::<_, Infallible>(resolved(&target, false)))
            .unwrap();
        assert!(!first.is_cached());

        let second = cache
            .resolve("/p", "./x", &tracker, || -> Result<Resolution, Infallible> {
                panic!("resolver must not run on a hit")
            })
            .unwrap();
        assert!(second.is_cached());
        assert_eq!(second.record().user_request, target);
    }

    #[test]
    fn absent_target_falls_through_to_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("x.js");
        let replacement = dir.path().join("x.ts");
        let mut tracker = FileChangeTracker::new();
        tracker.scan(&[target.clone()]).unwrap();

        let mut entries = BTreeMap::new();
        entries.insert(resolution_key("/p", "./x"), resolved(&target, false).record);
        let mut cache = ResolutionCache::from_entries(entries);

        let mut ran = false;
        let outcome = cache
            .resolve("/p", "./x", &tracker, || {
                ran = true;
                Ok::<_, Infallible>(resolved(&replacement, false))
            })
            .unwrap();
        assert!(ran);
        assert_eq!(outcome, ResolveOutcome::Fresh(resolved(&replacement, false).record));
        assert_eq!(
            cache.entries()[&resolution_key("/p", "./x")].user_request,
            replacement
        );
    }

    #[test]
    fn unknown_freshness_stats_the_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("x.js");
        fs::write(&target, "x").unwrap();
        let tracker = FileChangeTracker::new();

        let mut entries = BTreeMap::new();
        entries.insert(resolution_key("/p", "./x"), resolved(&target, false).record);
        let mut cache = ResolutionCache::from_entries(entries);

        let outcome = cache
            .resolve("/p", "./x", &tracker, || Err::<Resolution, _>("unused"))
            .unwrap();
        assert!(outcome.is_cached());
    }

    #[test]
    fn synthetic_results_are_not_stored() {
        let tracker = FileChangeTracker::new();
        let mut cache = ResolutionCache::new();
        let outcome = cache
            .resolve("/p", "./x", &tracker, || {
                Ok::<_, Infallible>(resolved(&PathBuf::from("/virtual/x.js"), true))
            })
            .unwrap();
        assert!(!outcome.is_cached());
        assert!(cache.is_empty());
        assert!(cache.drain_ops().unwrap().is_empty());
    }

    #[test]
    fn resolver_errors_propagate() {
        let tracker = FileChangeTracker::new();
        let mut cache = ResolutionCache::new();
        let err = cache
            .resolve("/p", "./x", &tracker, || Err::<Resolution, _>("not found"))
            .unwrap_err();
        assert_eq!(err, "not found");
        assert!(cache.is_empty());
    }

    #[test]
    fn drain_emits_changed_records_once() {
        let tracker = FileChangeTracker::new();
        let mut cache = ResolutionCache::new();
        cache
            .resolve("/p", "./x", &tracker, || {
                Ok::<_, Infallible>(resolved(Path::new("/p/x.js"), false))
            })
            .unwrap();

        let ops = cache.drain_ops().unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].key, resolution_key("/p", "./x"));
        assert!(cache.drain_ops().unwrap().is_empty());
    }
}
