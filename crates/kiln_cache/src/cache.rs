//! High-level cache orchestrator.
//!
//! `BuildCache` sequences one build run: the stamp gate, tier load, file
//! scan and invalidation pass in [`BuildCache::begin_run`], lookups while the
//! host builds, and the write-back in [`BuildCache::finish_run`]. When the
//! configuration cannot be resolved the cache is disabled and every
//! operation passes straight through to the host.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use kiln_common::{ContentHash, FileDigest, FileTimestamp};
use kiln_config::{CacheConfig, ResolvedConfig};

use crate::error::CacheError;
use crate::graph::{Dependency, DependencyBlock, Diagnostic, ExportUsage, ModuleDescriptor};
use crate::rebuild::{invalidate_missing_targets, needs_rebuild, stale_dependents, FreshnessView};
use crate::records::{DiagnosticRecord, ModuleRecord};
use crate::resolve::{Resolution, ResolveOutcome};
use crate::scope::{cache_prefix, CompilationScope};
use crate::serializer::{Capabilities, DependencySerializer};
use crate::stamp::{self, GateOutcome, Stamp};
use crate::store::StoreOp;
use crate::tiers::{TierBatches, TierState, TierStores, FILE_DEPENDENCIES_KEY};
use crate::tracker::FileChangeTracker;

/// What [`BuildCache::begin_run`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Whether the cache is active.
    pub enabled: bool,
    /// Result of the stamp comparison.
    pub gate: Option<GateOutcome>,
    /// The stamp computed for this run.
    pub stamp: Stamp,
    /// Files stat'ed and hashed by the scan.
    pub tracked_files: usize,
    /// Module records available after loading.
    pub cached_modules: usize,
    /// Modules invalidated because a dependency target disappeared.
    pub invalidated: Vec<String>,
    /// The scan failed and the cache was reset.
    pub scan_failed: bool,
}

impl RunReport {
    fn disabled() -> Self {
        Self {
            enabled: false,
            gate: None,
            stamp: Stamp::default(),
            tracked_files: 0,
            cached_modules: 0,
            invalidated: Vec::new(),
            scan_failed: false,
        }
    }
}

/// What [`BuildCache::finish_run`] wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistReport {
    /// The on-disk tiers were emptied before writing.
    pub cleared: bool,
    /// Module records written.
    pub modules_written: usize,
    /// Asset blobs written.
    pub assets_written: usize,
    /// File digests written or removed.
    pub digests_written: usize,
    /// Module records removed.
    pub modules_removed: usize,
    /// Asset blobs no remaining module refers to.
    pub assets_removed: usize,
    /// This write created a new per-config-hash cache directory.
    pub new_directory: bool,
    /// Paths added to the accumulated file-dependency list.
    pub file_dependencies_added: usize,
}

/// A module the host built in this run.
#[derive(Debug, Clone, Copy)]
pub struct BuiltModule<'a> {
    /// Prefix from [`BuildCache::cache_prefix`]; `None` for compilations
    /// that cannot be cached.
    pub scope_prefix: Option<&'a str>,
    /// The built module.
    pub module: &'a ModuleDescriptor,
}

/// A cached module that may be reused as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedModule {
    /// The stored record.
    pub record: ModuleRecord,
    /// Asset bytes by asset name.
    pub assets: BTreeMap<String, Vec<u8>>,
}

impl CachedModule {
    /// Rebuilds a module descriptor the host can use in place of building.
    pub fn into_descriptor(self) -> Result<ModuleDescriptor, CacheError> {
        let record = self.record;
        Ok(ModuleDescriptor {
            block: DependencyBlock::from_record(&record.tree)?,
            errors: restore_diagnostics(&record.errors)?,
            warnings: restore_diagnostics(&record.warnings)?,
            identifier: record.identifier,
            context: record.context,
            request: record.request,
            user_request: record.user_request,
            raw_request: record.raw_request,
            resource: record.resource,
            loaders: record.loaders,
            build_timestamp: record.build_timestamp,
            cacheable: true,
            from_cache: true,
            strict: record.strict,
            meta: record.meta,
            usage: record.usage,
            raw_source: record.raw_source,
            source: record.source,
            source_map: record.source_map,
            base_map: record.base_map,
            assets: self.assets,
            file_dependencies: record.file_dependencies,
            context_dependencies: record.context_dependencies,
        })
    }
}

fn restore_diagnostics(records: &[DiagnosticRecord]) -> Result<Vec<Diagnostic>, CacheError> {
    records
        .iter()
        .map(|d| {
            Ok(Diagnostic {
                message: d.message.clone(),
                origin: d.origin.as_ref().map(Dependency::from_record).transpose()?,
                dependencies: d
                    .dependencies
                    .iter()
                    .map(Dependency::from_record)
                    .collect::<Result<_, _>>()?,
            })
        })
        .collect()
}

struct Engine {
    config: ResolvedConfig,
    stores: TierStores,
    serializer: DependencySerializer,
    tracker: FileChangeTracker,
    tiers: TierState,
    stamp: Stamp,
    context_timestamps: HashMap<PathBuf, FileTimestamp>,
    /// The gate or the scan failed this run; the on-disk tiers are emptied
    /// before the next write.
    reset: bool,
    /// Modules to tombstone at the next write.
    invalidated: BTreeSet<String>,
    scope_error_logged: bool,
    new_directory: bool,
}

/// Cross-run build cache for one cache directory.
pub struct BuildCache {
    engine: Option<Engine>,
}

impl BuildCache {
    /// Opens the cache described by `config`.
    ///
    /// Relative paths resolve against `base_dir`; `build_options` feeds a
    /// derived config hash. Missing configuration disables the cache (logged
    /// once); failure to create the store directories is an error.
    pub fn open(
        config: &CacheConfig,
        base_dir: &Path,
        build_options: &serde_json::Value,
        capabilities: Capabilities,
    ) -> Result<Self, CacheError> {
        let config = match config.resolve(base_dir, build_options) {
            Ok(config) => config,
            Err(e) => {
                log::error!("build cache disabled: {e}");
                return Ok(Self::disabled());
            }
        };
        let new_directory = config.hash_in_directory && !config.cache_root.exists();
        let stores = TierStores::open(&config.cache_root)?;
        Ok(Self {
            engine: Some(Engine {
                config,
                stores,
                serializer: DependencySerializer::new(capabilities),
                tracker: FileChangeTracker::new(),
                tiers: TierState::default(),
                stamp: Stamp::default(),
                context_timestamps: HashMap::new(),
                reset: false,
                invalidated: BTreeSet::new(),
                scope_error_logged: false,
                new_directory,
            }),
        })
    }

    /// A cache that passes every operation through.
    pub fn disabled() -> Self {
        Self { engine: None }
    }

    /// Returns `true` unless the cache disabled itself.
    pub fn is_enabled(&self) -> bool {
        self.engine.is_some()
    }

    /// The resolved cache root.
    pub fn cache_root(&self) -> Option<&Path> {
        self.engine.as_ref().map(|e| e.config.cache_root.as_path())
    }

    /// The stamp computed by the latest [`begin_run`](Self::begin_run).
    pub fn stamp(&self) -> Option<&Stamp> {
        self.engine.as_ref().map(|e| &e.stamp)
    }

    /// The in-memory tiers.
    pub fn tiers(&self) -> Option<&TierState> {
        self.engine.as_ref().map(|e| &e.tiers)
    }

    /// The file tracker.
    pub fn tracker(&self) -> Option<&FileChangeTracker> {
        self.engine.as_ref().map(|e| &e.tracker)
    }

    /// Starts a run: checks the stamp, loads the tiers, scans the tracked
    /// files and invalidates modules whose dependency targets are gone.
    pub fn begin_run(&mut self) -> Result<RunReport, CacheError> {
        let Some(engine) = self.engine.as_mut() else {
            return Ok(RunReport::disabled());
        };
        let started = Instant::now();

        engine.stamp = stamp::compute_stamp(&engine.config)?;
        let previous = stamp::read_stamp(&engine.config.cache_root)?;
        let gate = stamp::check(&engine.stamp, &previous);

        if !gate.is_valid() {
            engine.tiers.clear();
            engine.tracker.clear();
            engine.reset = true;
        } else if !engine.tiers.is_loaded() {
            engine.tiers = engine.stores.load()?;
        }

        let mut scan_failed = false;
        let files = engine.tiers.file_dependencies();
        if !files.is_empty() {
            if let Err(e) = engine.tracker.scan(&files) {
                log::warn!("scanning tracked files failed, resetting the cache: {e}");
                engine.tiers.clear();
                engine.tracker.clear();
                engine.reset = true;
                scan_failed = true;
            }
        }

        let invalidated = invalidate_missing_targets(
            &mut engine.tiers.modules,
            engine.tiers.resolutions.entries(),
            &engine.tracker,
        );
        engine.invalidated.extend(invalidated.iter().cloned());

        log::debug!(
            "cache run started in {:?}: {} tracked files, {} cached modules",
            started.elapsed(),
            engine.tracker.len(),
            engine.tiers.modules.len()
        );
        Ok(RunReport {
            enabled: true,
            gate: Some(gate),
            stamp: engine.stamp.clone(),
            tracked_files: engine.tracker.len(),
            cached_modules: engine.tiers.modules.len(),
            invalidated,
            scan_failed,
        })
    }

    /// Records the host's directory timestamps for context dependencies.
    pub fn set_context_timestamps(&mut self, timestamps: HashMap<PathBuf, FileTimestamp>) {
        if let Some(engine) = self.engine.as_mut() {
            engine.context_timestamps = timestamps;
        }
    }

    /// Identifier prefix for a compilation, or `None` if it cannot be cached.
    ///
    /// `chain` lists the compilation and its ancestors, innermost first; the
    /// root compilation passes an empty chain. The first uncacheable child
    /// is reported once per cache.
    pub fn cache_prefix(&mut self, chain: &[CompilationScope]) -> Option<String> {
        let engine = self.engine.as_mut()?;
        match cache_prefix(chain) {
            Ok(prefix) => Some(prefix),
            Err(e) => {
                if !engine.scope_error_logged {
                    engine.scope_error_logged = true;
                    log::error!("{e}");
                }
                None
            }
        }
    }

    /// Resolves `request` from `context`, using the resolution tier when the
    /// cached target still exists.
    pub fn resolve<E>(
        &mut self,
        context: &str,
        request: &str,
        resolver: impl FnOnce() -> Result<Resolution, E>,
    ) -> Result<ResolveOutcome, E> {
        match self.engine.as_mut() {
            Some(engine) => engine
                .tiers
                .resolutions
                .resolve(context, request, &engine.tracker, resolver),
            None => resolver().map(|r| ResolveOutcome::Fresh(r.record)),
        }
    }

    /// Returns the cached module for `identifier` under `prefix`, if it may
    /// be reused.
    ///
    /// A record that is invalid, needs a rebuild, or is missing one of its
    /// assets is a miss.
    pub fn lookup_module(&self, prefix: &str, identifier: &str) -> Option<CachedModule> {
        let engine = self.engine.as_ref()?;
        let key = format!("{prefix}{identifier}");
        let record = engine.tiers.modules.get(&key)?;

        if needs_rebuild(record, &engine.freshness()) {
            log::debug!("cached module {key} needs a rebuild");
            return None;
        }

        let mut assets = BTreeMap::new();
        for name in &record.assets {
            match engine.tiers.assets.get(&asset_key(name)) {
                Some(bytes) => {
                    assets.insert(name.clone(), bytes.clone());
                }
                None => {
                    log::debug!("cached module {key} is missing asset {name}");
                    return None;
                }
            }
        }
        Some(CachedModule {
            record: record.clone(),
            assets,
        })
    }

    /// Compares used-export information after the host sealed a compilation.
    ///
    /// Cached modules whose usage differs from the host's are invalidated.
    /// Returns `true` if any were, meaning the host needs another pass.
    pub fn reconcile_usage<'a>(
        &mut self,
        prefix: &str,
        modules: impl IntoIterator<Item = (&'a str, &'a ExportUsage)>,
    ) -> bool {
        let Some(engine) = self.engine.as_mut() else {
            return false;
        };
        let mut need_pass = false;
        for (identifier, usage) in modules {
            let key = format!("{prefix}{identifier}");
            if let Some(record) = engine.tiers.modules.get_mut(&key) {
                if !record.invalid && record.usage != *usage {
                    log::debug!("export usage of {key} changed");
                    record.invalid = true;
                    engine.invalidated.insert(key);
                    need_pass = true;
                }
            }
        }
        need_pass
    }

    /// Keys of cached modules that would be rebuilt in the current run.
    pub fn stale_modules(&self) -> Vec<String> {
        let Some(engine) = self.engine.as_ref() else {
            return Vec::new();
        };
        let view = engine.freshness();
        engine
            .tiers
            .modules
            .iter()
            .filter(|(_, record)| needs_rebuild(record, &view))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Writes the run's results back.
    ///
    /// `file_dependencies` is every file the host read; it is folded into the
    /// accumulated list. Eligible modules are serialized with their assets
    /// and settled file digests, invalidated modules are removed, and the
    /// stamp and all tiers are written concurrently.
    pub fn finish_run(
        &mut self,
        file_dependencies: &[PathBuf],
        modules: &[BuiltModule<'_>],
    ) -> Result<PersistReport, CacheError> {
        let Some(engine) = self.engine.as_mut() else {
            return Ok(PersistReport::default());
        };
        let started = Instant::now();
        let mut report = PersistReport::default();
        let mut batches = TierBatches::default();

        if engine.reset {
            engine.stores.clear_all()?;
            report.cleared = true;
        }

        report.file_dependencies_added = engine.merge_file_dependencies(file_dependencies, &mut batches)?;

        let mut rebuilt = HashSet::new();
        let mut settlements: BTreeMap<PathBuf, Option<FileDigest>> = BTreeMap::new();
        for built in modules {
            let Some(prefix) = built.scope_prefix else {
                continue;
            };
            let module = built.module;
            let key = format!("{prefix}{}", module.identifier);
            if !engine.is_eligible(&key, module) {
                continue;
            }

            let record = engine.serializer.serialize_module(module)?;
            let bytes = serde_json::to_vec(&record).map_err(CacheError::serialization)?;
            batches.modules.push(StoreOp::put(key.clone(), bytes));
            report.modules_written += 1;

            for (name, data) in &module.assets {
                let asset = asset_key(name);
                batches.assets.push(StoreOp::put(asset.clone(), data.clone()));
                engine.tiers.assets.insert(asset, data.clone());
                report.assets_written += 1;
            }

            for file in &module.file_dependencies {
                let digest = engine.tracker.settled_digest(file, module.build_timestamp)?;
                settlements
                    .entry(file.clone())
                    .and_modify(|seen: &mut Option<FileDigest>| {
                        if *seen != digest {
                            *seen = None;
                        }
                    })
                    .or_insert(digest);
            }

            engine.invalidated.remove(&key);
            engine.tiers.modules.insert(key.clone(), record);
            rebuilt.insert(key);
        }

        // A file counts as settled only if every module written this run saw
        // it settled with the same content.
        let mut changed_files = HashSet::new();
        for (file, settled) in settlements {
            let previous = engine.tiers.md5.get(&file).cloned();
            let op_key = file.to_string_lossy().into_owned();
            match settled {
                Some(digest) if previous.as_ref() != Some(&digest) => {
                    let bytes = serde_json::to_vec(&digest).map_err(CacheError::serialization)?;
                    batches.md5.push(StoreOp::put(op_key, bytes));
                    engine.tiers.md5.insert(file.clone(), digest);
                    changed_files.insert(file);
                    report.digests_written += 1;
                }
                None if previous.is_some() => {
                    batches.md5.push(StoreOp::delete(op_key));
                    engine.tiers.md5.remove(&file);
                    report.digests_written += 1;
                }
                _ => {}
            }
        }

        for key in stale_dependents(&engine.tiers.modules, &changed_files, &rebuilt) {
            log::debug!("invalidating {key}: a dependency's recorded digest changed");
            engine.invalidated.insert(key);
        }
        for key in std::mem::take(&mut engine.invalidated) {
            if rebuilt.contains(&key) {
                continue;
            }
            engine.tiers.modules.remove(&key);
            batches.modules.push(StoreOp::delete(key));
            report.modules_removed += 1;
        }
        if report.modules_removed > 0 {
            report.assets_removed = engine.sweep_assets(&mut batches);
        }

        batches.resolutions = engine.tiers.resolutions.drain_ops()?;

        if engine.new_directory {
            engine.new_directory = false;
            report.new_directory = true;
            log::info!("writing a new build cache to {}", engine.config.cache_root.display());
        }

        let root = &engine.config.cache_root;
        let stamp = &engine.stamp;
        let stores = &engine.stores;
        let (stamp_result, tiers_result) = rayon::join(
            || stamp::write_stamp(root, stamp),
            || stores.persist(batches),
        );
        stamp_result?;
        tiers_result?;

        engine.reset = false;
        log::debug!(
            "cache written in {:?}: {} modules, {} assets, {} digests, {} removed",
            started.elapsed(),
            report.modules_written,
            report.assets_written,
            report.digests_written,
            report.modules_removed
        );
        Ok(report)
    }
}

impl Engine {
    fn freshness(&self) -> FreshnessView<'_> {
        FreshnessView {
            files: &self.tracker,
            contexts: &self.context_timestamps,
            cached_hashes: &self.tiers.md5,
        }
    }

    /// A module is written back if it has a request, is cacheable, was not
    /// itself restored from the cache, and is new or newer than the record.
    fn is_eligible(&self, key: &str, module: &ModuleDescriptor) -> bool {
        if module.request.is_empty() || !module.cacheable || module.from_cache {
            return false;
        }
        self.tiers
            .modules
            .get(key)
            .map_or(true, |existing| {
                existing.invalid || module.build_timestamp > existing.build_timestamp
            })
    }

    /// Deletes asset blobs that no cached module lists any more.
    fn sweep_assets(&mut self, batches: &mut TierBatches) -> usize {
        let live: HashSet<String> = self
            .tiers
            .modules
            .values()
            .flat_map(|record| record.assets.iter().map(|name| asset_key(name)))
            .collect();
        let dead: Vec<String> = self
            .tiers
            .assets
            .keys()
            .filter(|key| !live.contains(*key))
            .cloned()
            .collect();
        for key in &dead {
            self.tiers.assets.remove(key);
            batches.assets.push(StoreOp::delete(key.clone()));
        }
        dead.len()
    }

    /// Appends unseen paths to the accumulated file-dependency list.
    fn merge_file_dependencies(
        &mut self,
        files: &[PathBuf],
        batches: &mut TierBatches,
    ) -> Result<usize, CacheError> {
        let mut all = self.tiers.file_dependencies();
        let mut seen: HashSet<PathBuf> = all.iter().cloned().collect();
        let before = all.len();
        for file in files {
            if seen.insert(file.clone()) {
                all.push(file.clone());
            }
        }
        let added = all.len() - before;
        if added > 0 {
            let value = serde_json::to_value(&all).map_err(CacheError::serialization)?;
            let bytes = serde_json::to_vec(&value).map_err(CacheError::serialization)?;
            batches.data.push(StoreOp::put(FILE_DEPENDENCIES_KEY, bytes));
            self.tiers.data.insert(FILE_DEPENDENCIES_KEY.to_string(), value);
        }
        Ok(added)
    }
}

/// Asset tier key of an asset name.
pub fn asset_key(name: &str) -> String {
    ContentHash::from_key(name).to_string()
}
