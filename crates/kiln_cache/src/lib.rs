//! On-disk, cross-run build cache for the kiln incremental build pipeline.
//!
//! The cache lets the host pipeline skip modules whose inputs did not change
//! since the previous run, and discards everything the moment the
//! environment or configuration fingerprint changes. It consists of:
//!
//! - [`store`]: key/value persistence backends (files, embedded database,
//!   JSON snapshot)
//! - [`stamp`]: the fingerprint gate deciding whether the cache is trusted
//! - [`tracker`]: per-file timestamps and content digests
//! - [`serializer`] and [`records`]: the dependency graph as persistable data
//! - [`rebuild`]: the per-module reuse decision and invalidation passes
//! - [`resolve`]: the resolution cache
//! - [`cache`]: the [`BuildCache`] orchestrator tying them together

#![warn(missing_docs)]

pub mod cache;
pub mod error;
pub mod graph;
pub mod rebuild;
pub mod records;
pub mod resolve;
pub mod scope;
pub mod serializer;
pub mod stamp;
pub mod store;
pub mod tiers;
pub mod tracker;

pub use cache::{BuildCache, BuiltModule, CachedModule, PersistReport, RunReport};
pub use error::CacheError;
pub use graph::{
    Dependency, DependencyBlock, Diagnostic, ExportUsage, ModuleDescriptor, UsedExports, Variable,
};
pub use records::{BlockRecord, DependencyRecord, ModuleRecord, ResolutionRecord};
pub use resolve::{Resolution, ResolveOutcome};
pub use scope::{CompilationScope, ScopeCache};
pub use serializer::Capabilities;
pub use stamp::{GateOutcome, Stamp};
pub use store::{CacheStore, StoreKind, StoreOp};
pub use tracker::FileChangeTracker;
