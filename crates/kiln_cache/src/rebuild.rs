//! Decides whether cached modules may be reused.
//!
//! Timestamps give a cheap answer; content digests overrule a newer
//! timestamp when both the cached and the current digest are known and
//! equal. Unknown freshness is always treated as a change.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use kiln_common::{FileDigest, FileTimestamp};

use crate::records::{ModuleRecord, ResolutionRecord};
use crate::resolve::resolution_key;
use crate::tracker::FileChangeTracker;

/// Everything the rebuild decision consults about the current filesystem.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessView<'a> {
    /// Timestamps and digests from the latest scan.
    pub files: &'a FileChangeTracker,
    /// Directory timestamps supplied by the host.
    pub contexts: &'a HashMap<PathBuf, FileTimestamp>,
    /// Digests recorded by previous runs.
    pub cached_hashes: &'a HashMap<PathBuf, FileDigest>,
}

impl FreshnessView<'_> {
    fn file_is_stale(&self, path: &Path, built_at: u64) -> bool {
        let newer = self
            .files
            .timestamp(path)
            .map_or(true, |ts| ts.is_newer_than(built_at));
        if !newer {
            return false;
        }
        match (self.cached_hashes.get(path), self.files.hash(path).digest()) {
            (Some(cached), Some(current)) => cached != current,
            _ => true,
        }
    }

    fn context_is_stale(&self, path: &Path, built_at: u64) -> bool {
        self.contexts
            .get(path)
            .map_or(true, |ts| ts.is_newer_than(built_at))
    }
}

/// Returns `true` if `record` must be rebuilt.
///
/// Stops at the first stale dependency.
pub fn needs_rebuild(record: &ModuleRecord, view: &FreshnessView<'_>) -> bool {
    if record.invalid {
        return true;
    }
    let built_at = record.build_timestamp;
    record
        .file_dependencies
        .iter()
        .any(|f| view.file_is_stale(f, built_at))
        || record
            .context_dependencies
            .iter()
            .any(|c| view.context_is_stale(c, built_at))
}

/// Marks modules whose resolved dependency targets disappeared.
///
/// Walks every module's dependency tree. A checked dependency with no
/// resolution record, or whose resolved file is confirmed absent, marks the
/// module invalid. Unknown timestamps are left to the rebuild decision.
/// Returns the keys of newly invalidated modules.
pub fn invalidate_missing_targets(
    modules: &mut BTreeMap<String, ModuleRecord>,
    resolutions: &BTreeMap<String, ResolutionRecord>,
    files: &FileChangeTracker,
) -> Vec<String> {
    let mut invalidated = Vec::new();
    for (key, record) in modules.iter_mut().filter(|(_, r)| !r.invalid) {
        let mut missing = false;
        record.tree.for_each_dependency(&mut |dep| {
            if missing {
                return;
            }
            let Some(request) = dep.checked_request() else {
                return;
            };
            missing = match resolutions.get(&resolution_key(&record.context, request)) {
                None => true,
                Some(res) => files.timestamp(&res.user_request) == Some(FileTimestamp::Absent),
            };
        });
        if missing {
            log::debug!("invalidating {key}: a dependency target is gone");
            record.invalid = true;
            invalidated.push(key.clone());
        }
    }
    invalidated
}

/// Keys of cached modules that depend on a file in `changed` and were not
/// rebuilt this run.
pub fn stale_dependents(
    modules: &BTreeMap<String, ModuleRecord>,
    changed: &HashSet<PathBuf>,
    rebuilt: &HashSet<String>,
) -> Vec<String> {
    if changed.is_empty() {
        return Vec::new();
    }
    modules
        .iter()
        .filter(|(key, record)| {
            !record.invalid
                && !rebuilt.contains(key.as_str())
                && record.file_dependencies.iter().any(|f| changed.contains(f))
        })
        .map(|(key, _)| key.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{BlockRecord, DependencyRecord};
    use std::fs;

    fn record(build_timestamp: u64, files: &[&Path]) -> ModuleRecord {
        ModuleRecord {
            identifier: "m".into(),
            context: "/p".into(),
            request: "/p/m.js".into(),
            user_request: "/p/m.js".into(),
            raw_request: "./m".into(),
            resource: "/p/m.js".into(),
            loaders: Vec::new(),
            assets: Vec::new(),
            build_timestamp,
            strict: false,
            meta: serde_json::Value::Null,
            usage: Default::default(),
            raw_source: None,
            source: String::new(),
            source_map: None,
            base_map: None,
            hash_content: String::new(),
            tree: BlockRecord::default(),
            file_dependencies: files.iter().map(|p| p.to_path_buf()).collect(),
            context_dependencies: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            invalid: false,
        }
    }

    fn scanned(files: &[PathBuf]) -> FileChangeTracker {
        let mut tracker = FileChangeTracker::new();
        tracker.scan(files).unwrap();
        tracker
    }

    #[test]
    fn fresh_dependencies_need_no_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let dep = dir.path().join("d.js");
        fs::write(&dep, "d").unwrap();
        let tracker = scanned(&[dep.clone()]);
        let empty = HashMap::new();
        let view = FreshnessView {
            files: &tracker,
            contexts: &empty,
            cached_hashes: &HashMap::new(),
        };

        assert!(!needs_rebuild(&record(u64::MAX, &[&dep]), &view));
        assert!(!needs_rebuild(&record(0, &[]), &view));
    }

    #[test]
    fn equal_digest_overrides_newer_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let dep = dir.path().join("d.js");
        fs::write(&dep, "d").unwrap();
        let tracker = scanned(&[dep.clone()]);
        let contexts = HashMap::new();
        let mut cached = HashMap::new();
        cached.insert(dep.clone(), FileDigest::from_bytes(b"d"));

        let view = FreshnessView {
            files: &tracker,
            contexts: &contexts,
            cached_hashes: &cached,
        };
        assert!(!needs_rebuild(&record(0, &[&dep]), &view));

        cached.insert(dep.clone(), FileDigest::from_bytes(b"old"));
        let view = FreshnessView {
            files: &tracker,
            contexts: &contexts,
            cached_hashes: &cached,
        };
        assert!(needs_rebuild(&record(0, &[&dep]), &view));
    }

    #[test]
    fn newer_timestamp_without_cached_digest_rebuilds() {
        let dir = tempfile::tempdir().unwrap();
        let dep = dir.path().join("d.js");
        fs::write(&dep, "d").unwrap();
        let tracker = scanned(&[dep.clone()]);
        let view = FreshnessView {
            files: &tracker,
            contexts: &HashMap::new(),
            cached_hashes: &HashMap::new(),
        };
        assert!(needs_rebuild(&record(0, &[&dep]), &view));
    }

    #[test]
    fn vanished_or_unknown_dependency_rebuilds() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone.js");
        let tracker = scanned(&[gone.clone()]);
        let mut cached = HashMap::new();
        cached.insert(gone.clone(), FileDigest::from_bytes(b"x"));
        let view = FreshnessView {
            files: &tracker,
            contexts: &HashMap::new(),
            cached_hashes: &cached,
        };
        assert!(needs_rebuild(&record(u64::MAX, &[&gone]), &view));

        let untracked = dir.path().join("untracked.js");
        assert!(needs_rebuild(&record(u64::MAX, &[&untracked]), &view));
    }

    #[test]
    fn context_dependencies_use_host_timestamps() {
        let tracker = FileChangeTracker::new();
        let mut contexts = HashMap::new();
        contexts.insert(PathBuf::from("/p/dir"), FileTimestamp::Modified(50));
        let cached = HashMap::new();
        let view = FreshnessView {
            files: &tracker,
            contexts: &contexts,
            cached_hashes: &cached,
        };

        let mut rec = record(100, &[]);
        rec.context_dependencies.push(PathBuf::from("/p/dir"));
        assert!(!needs_rebuild(&rec, &view));

        rec.build_timestamp = 10;
        assert!(needs_rebuild(&rec, &view));

        rec.context_dependencies = vec![PathBuf::from("/p/other")];
        rec.build_timestamp = 100;
        assert!(needs_rebuild(&rec, &view));
    }

    #[test]
    fn invalid_records_always_rebuild() {
        let tracker = FileChangeTracker::new();
        let view = FreshnessView {
            files: &tracker,
            contexts: &HashMap::new(),
            cached_hashes: &HashMap::new(),
        };
        let mut rec = record(u64::MAX, &[]);
        rec.invalid = true;
        assert!(needs_rebuild(&rec, &view));
    }

    fn with_request(request: &str, context: bool) -> ModuleRecord {
        let mut rec = record(0, &[]);
        rec.tree.dependencies.push(DependencyRecord::Request {
            request: Some(request.into()),
            context,
            critical: false,
            recursive: false,
            reg_exp: None,
            loc: None,
            constant: false,
        });
        rec
    }

    fn resolution(request: &str, target: &Path) -> (String, ResolutionRecord) {
        (
            resolution_key("/p", request),
            ResolutionRecord {
                context: "/p".into(),
                request: request.into(),
                user_request: target.to_path_buf(),
                resource: None,
                loaders: Vec::new(),
                resolver_meta: serde_json::Value::Null,
                parser_options: serde_json::Value::Null,
            },
        )
    }

    #[test]
    fn missing_targets_invalidate_modules() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.js");
        let gone = dir.path().join("b.js");
        fs::write(&present, "a").unwrap();
        let tracker = scanned(&[present.clone(), gone.clone()]);

        let resolutions: BTreeMap<_, _> =
            [resolution("./a", &present), resolution("./b", &gone)].into_iter().collect();
        let mut modules = BTreeMap::new();
        modules.insert("keep".to_string(), with_request("./a", false));
        modules.insert("drop".to_string(), with_request("./b", false));
        modules.insert("context".to_string(), with_request("./b", true));
        modules.insert("unresolved".to_string(), with_request("./c", false));

        let mut invalidated = invalidate_missing_targets(&mut modules, &resolutions, &tracker);
        invalidated.sort();
        assert_eq!(invalidated, ["drop", "unresolved"]);
        assert!(modules["drop"].invalid);
        assert!(!modules["keep"].invalid);
        assert!(!modules["context"].invalid);
    }

    #[test]
    fn stale_dependents_skips_rebuilt_modules() {
        let a = PathBuf::from("/p/a.js");
        let mut modules = BTreeMap::new();
        modules.insert("x".to_string(), record(0, &[&a]));
        modules.insert("y".to_string(), record(0, &[&a]));
        modules.insert("z".to_string(), record(0, &[Path::new("/p/z.js")]));

        let changed: HashSet<PathBuf> = [a].into_iter().collect();
        let rebuilt: HashSet<String> = ["y".to_string()].into_iter().collect();
        assert_eq!(stale_dependents(&modules, &changed, &rebuilt), ["x"]);
    }
}
