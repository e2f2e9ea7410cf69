//! The five persisted cache tiers.
//!
//! ```text
//! <cache root>/
//!   stamp          fingerprint (see `stamp`)
//!   resolve.json   resolutions   (SnapshotStore)
//!   assets/        asset blobs   (FileStore)
//!   modules/       module records (DbStore)
//!   data/          bookkeeping   (DbStore)
//!   md5/           file digests  (DbStore)
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Instant;

use kiln_common::FileDigest;
use rayon::prelude::*;
use serde::de::DeserializeOwned;

use crate::error::CacheError;
use crate::records::{ModuleRecord, ResolutionRecord};
use crate::resolve::ResolutionCache;
use crate::store::{open_store, CacheStore, StoreKind, StoreOp, StoreSnapshot};

/// Resolution tier file.
pub const RESOLVE_FILE: &str = "resolve.json";
/// Asset tier directory.
pub const ASSETS_DIR: &str = "assets";
/// Module tier directory.
pub const MODULES_DIR: &str = "modules";
/// Data tier directory.
pub const DATA_DIR: &str = "data";
/// Content-hash tier directory.
pub const MD5_DIR: &str = "md5";

/// Data tier key of the accumulated file-dependency list.
pub const FILE_DEPENDENCIES_KEY: &str = "fileDependencies";

/// Backend and location of each tier, in load order.
const TIER_LAYOUT: [(StoreKind, &str); 5] = [
    (StoreKind::Snapshot, RESOLVE_FILE),
    (StoreKind::Files, ASSETS_DIR),
    (StoreKind::Database, MODULES_DIR),
    (StoreKind::Database, DATA_DIR),
    (StoreKind::Database, MD5_DIR),
];

/// One store per tier.
pub struct TierStores {
    resolutions: Box<dyn CacheStore>,
    assets: Box<dyn CacheStore>,
    modules: Box<dyn CacheStore>,
    data: Box<dyn CacheStore>,
    md5: Box<dyn CacheStore>,
}

/// Pending writes for each tier.
#[derive(Debug, Default)]
pub struct TierBatches {
    /// Resolution upserts.
    pub resolutions: Vec<StoreOp>,
    /// Asset blobs.
    pub assets: Vec<StoreOp>,
    /// Module records and tombstones.
    pub modules: Vec<StoreOp>,
    /// Bookkeeping values.
    pub data: Vec<StoreOp>,
    /// File digests.
    pub md5: Vec<StoreOp>,
}

impl TierBatches {
    /// Total number of operations.
    pub fn len(&self) -> usize {
        self.resolutions.len() + self.assets.len() + self.modules.len() + self.data.len() + self.md5.len()
    }

    /// Returns `true` if there is nothing to write.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TierStores {
    /// Opens every tier store under `root`, creating directories as needed.
    pub fn open(root: &Path) -> Result<Self, CacheError> {
        Ok(Self {
            resolutions: open_tier(root, TIER_LAYOUT[0])?,
            assets: open_tier(root, TIER_LAYOUT[1])?,
            modules: open_tier(root, TIER_LAYOUT[2])?,
            data: open_tier(root, TIER_LAYOUT[3])?,
            md5: open_tier(root, TIER_LAYOUT[4])?,
        })
    }

    fn all(&self) -> [&dyn CacheStore; 5] {
        [
            self.resolutions.as_ref(),
            self.assets.as_ref(),
            self.modules.as_ref(),
            self.data.as_ref(),
            self.md5.as_ref(),
        ]
    }

    /// Reads every tier concurrently.
    ///
    /// A store that does not exist yet loads as empty; any other failure is
    /// returned. Records that fail to parse are skipped with a warning.
    pub fn load(&self) -> Result<TierState, CacheError> {
        let started = Instant::now();
        let snapshots = self
            .all()
            .to_vec()
            .into_par_iter()
            .map(read_tier)
            .collect::<Result<Vec<_>, _>>()?;
        let state = assemble(snapshots);
        log::debug!(
            "loaded cache tiers in {:?}: {} resolutions, {} modules, {} assets, {} digests",
            started.elapsed(),
            state.resolutions.len(),
            state.modules.len(),
            state.assets.len(),
            state.md5.len()
        );
        Ok(state)
    }

    /// Reads the tiers under `root` without creating anything. Tiers whose
    /// store does not exist load as empty.
    pub fn load_existing(root: &Path) -> Result<TierState, CacheError> {
        let snapshots = TIER_LAYOUT
            .par_iter()
            .map(|&(kind, name)| {
                let path = root.join(name);
                if !path.exists() {
                    return Ok(StoreSnapshot::new());
                }
                read_tier(open_store(kind, &path)?.as_ref())
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(assemble(snapshots))
    }

    /// Writes every non-empty batch concurrently.
    pub fn persist(&self, batches: TierBatches) -> Result<(), CacheError> {
        let started = Instant::now();
        let total = batches.len();
        let ops = vec![
            batches.resolutions,
            batches.assets,
            batches.modules,
            batches.data,
            batches.md5,
        ];
        self.all()
            .to_vec()
            .into_par_iter()
            .zip(ops.into_par_iter())
            .filter(|(_, ops)| !ops.is_empty())
            .try_for_each(|(store, ops)| store.write(&ops))?;
        log::debug!("persisted {total} cache entries in {:?}", started.elapsed());
        Ok(())
    }

    /// Empties every tier concurrently.
    pub fn clear_all(&self) -> Result<(), CacheError> {
        self.all()
            .to_vec()
            .into_par_iter()
            .try_for_each(|store| store.clear())
    }

    /// Location of each tier, in load order.
    pub fn locations(&self) -> Vec<&Path> {
        self.all().into_iter().map(|s| s.location()).collect()
    }
}

fn open_tier(root: &Path, (kind, name): (StoreKind, &str)) -> Result<Box<dyn CacheStore>, CacheError> {
    open_store(kind, &root.join(name))
}

/// Decodes tier snapshots given in load order.
fn assemble(snapshots: Vec<StoreSnapshot>) -> TierState {
    let mut snapshots = snapshots.into_iter();
    let mut next = || snapshots.next().unwrap_or_default();
    let (resolutions, assets, modules, data, md5) = (next(), next(), next(), next(), next());
    TierState {
        resolutions: ResolutionCache::from_entries(decode_records::<ResolutionRecord>(
            RESOLVE_FILE,
            resolutions,
        )),
        assets,
        modules: decode_records(MODULES_DIR, modules),
        data: decode_records(DATA_DIR, data),
        md5: decode_records::<FileDigest>(MD5_DIR, md5)
            .into_iter()
            .map(|(k, v)| (PathBuf::from(k), v))
            .collect(),
        loaded: true,
    }
}

fn read_tier(store: &dyn CacheStore) -> Result<StoreSnapshot, CacheError> {
    match store.read() {
        Ok(snapshot) => Ok(snapshot),
        Err(e) if e.is_not_found() => Ok(StoreSnapshot::new()),
        Err(e) => Err(e),
    }
}

fn decode_records<T: DeserializeOwned>(tier: &str, snapshot: StoreSnapshot) -> BTreeMap<String, T> {
    snapshot
        .into_iter()
        .filter_map(|(key, bytes)| match serde_json::from_slice(&bytes) {
            Ok(value) => Some((key, value)),
            Err(e) => {
                log::warn!("skipping malformed {tier} record {key}: {e}");
                None
            }
        })
        .collect()
}

/// In-memory contents of the tiers, owned by the orchestrator.
#[derive(Debug, Default)]
pub struct TierState {
    /// Resolution tier.
    pub resolutions: ResolutionCache,
    /// Asset tier, keyed by the hash of the asset name.
    pub assets: BTreeMap<String, Vec<u8>>,
    /// Module tier, keyed by scope-prefixed identifier.
    pub modules: BTreeMap<String, ModuleRecord>,
    /// Data tier.
    pub data: BTreeMap<String, serde_json::Value>,
    /// Content-hash tier.
    pub md5: HashMap<PathBuf, FileDigest>,
    loaded: bool,
}

impl TierState {
    /// Returns `true` once the tiers were read from disk in this process.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Empties every tier.
    pub fn clear(&mut self) {
        *self = TierState::default();
    }

    /// The accumulated file-dependency list from the data tier.
    pub fn file_dependencies(&self) -> Vec<PathBuf> {
        self.data
            .get(FILE_DEPENDENCIES_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DbStore;

    #[test]
    fn empty_root_loads_empty_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let stores = TierStores::open(&dir.path().join("cache")).unwrap();
        let state = stores.load().unwrap();
        assert!(state.is_loaded());
        assert!(state.modules.is_empty());
        assert!(state.resolutions.is_empty());
        assert!(state.file_dependencies().is_empty());
    }

    #[test]
    fn persist_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cache");
        {
            let stores = TierStores::open(&root).unwrap();
            let batches = TierBatches {
                assets: vec![StoreOp::put("h1", vec![1u8, 2, 3])],
                data: vec![StoreOp::put(
                    FILE_DEPENDENCIES_KEY,
                    serde_json::to_vec(&["/p/a.js"]).unwrap(),
                )],
                md5: vec![StoreOp::put(
                    "/p/a.js",
                    serde_json::to_vec(&FileDigest::from_bytes(b"a")).unwrap(),
                )],
                ..TierBatches::default()
            };
            stores.persist(batches).unwrap();
        }

        let stores = TierStores::open(&root).unwrap();
        let state = stores.load().unwrap();
        assert_eq!(state.assets["h1"], [1, 2, 3]);
        assert_eq!(state.file_dependencies(), [PathBuf::from("/p/a.js")]);
        assert_eq!(
            state.md5[Path::new("/p/a.js")],
            FileDigest::from_bytes(b"a")
        );
    }

    #[test]
    fn malformed_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cache");
        {
            let modules = DbStore::open(&root.join(MODULES_DIR)).unwrap();
            modules
                .write(&[StoreOp::put("broken", "{not json")])
                .unwrap();
        }
        let stores = TierStores::open(&root).unwrap();
        let state = stores.load().unwrap();
        assert!(state.modules.is_empty());
    }

    #[test]
    fn load_existing_creates_no_stores() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cache");
        {
            let data = DbStore::open(&root.join(DATA_DIR)).unwrap();
            data.write(&[StoreOp::put("k", "1")]).unwrap();
        }

        let state = TierStores::load_existing(&root).unwrap();
        assert_eq!(state.data["k"], serde_json::json!(1));
        assert!(state.modules.is_empty());
        for missing in [RESOLVE_FILE, ASSETS_DIR, MODULES_DIR, MD5_DIR] {
            assert!(!root.join(missing).exists());
        }
    }

    #[test]
    fn clear_all_empties_disk() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cache");
        let stores = TierStores::open(&root).unwrap();
        stores
            .persist(TierBatches {
                data: vec![StoreOp::put("k", "1")],
                assets: vec![StoreOp::put("a", "x")],
                ..TierBatches::default()
            })
            .unwrap();
        stores.clear_all().unwrap();
        let state = stores.load().unwrap();
        assert!(state.data.is_empty());
        assert!(state.assets.is_empty());
    }

    #[test]
    fn clear_resets_state() {
        let mut state = TierState::default();
        state.data.insert("k".into(), serde_json::json!(1));
        state.clear();
        assert!(state.data.is_empty());
        assert!(!state.is_loaded());
    }
}
