//! The host pipeline's live dependency graph.
//!
//! These are the objects the build pipeline hands to the cache: a module's
//! dependency block with its dependencies, variables and nested blocks. They
//! may hold live values (a compiled [`Regex`]) that are not persisted as-is;
//! the serializer turns them into plain records.

use std::collections::BTreeMap;
use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};

use kiln_common::FileDigest;

/// A line/column position in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// 1-based line.
    pub line: u32,
    /// 0-based column.
    pub column: u32,
}

/// Source range of a dependency, copied by value into records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Start of the range.
    pub start: Position,
    /// End of the range, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<Position>,
}

/// How a plain request dependency is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestKind {
    /// Resolved to a single module.
    #[default]
    Module,
    /// Resolved to a directory context (a set of modules matched by regex).
    Context,
    /// A constant replacement; resolves to nothing.
    Constant,
}

/// A dependency on a request string (`require("./x")`, `require.context`, or
/// a constant replacement).
#[derive(Debug, Clone, Default)]
pub struct RequestDependency {
    /// The raw request. Constant dependencies usually have none.
    pub request: Option<String>,
    /// How the request resolves.
    pub kind: RequestKind,
    /// Whether the host flagged the expression as critical.
    pub critical: bool,
    /// Whether a context dependency recurses into subdirectories.
    pub recursive: bool,
    /// Filter of a context dependency.
    pub reg_exp: Option<Regex>,
    /// Where the dependency appears in the source.
    pub loc: Option<SourceLocation>,
}

/// An export declared by the module itself.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportDependency {
    /// Local identifier being exported.
    pub id: Option<String>,
    /// Exported name.
    pub name: Option<String>,
    /// Precedence among competing exports of the same name.
    pub precedence: u32,
}

/// A module-level import statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDependency {
    /// The imported request.
    pub request: String,
}

/// A binding imported through an import statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpecifierDependency {
    /// Request of the owning import statement.
    pub request: String,
    /// Imported identifier.
    pub id: Option<String>,
    /// Local name.
    pub name: Option<String>,
    /// Where the binding is used.
    pub loc: Option<SourceLocation>,
}

/// A binding imported and re-exported in one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReexportDependency {
    /// Request of the owning import statement.
    pub request: String,
    /// Imported identifier.
    pub id: Option<String>,
    /// Exported name.
    pub name: Option<String>,
}

/// A live dependency, one variant per dependency kind.
#[derive(Debug, Clone)]
pub enum Dependency {
    /// Plain request, context or constant dependency.
    Request(RequestDependency),
    /// Export declared by the module.
    ModuleExport(ExportDependency),
    /// Import statement.
    ModuleImport(ImportDependency),
    /// Imported binding.
    ImportSpecifier(ImportSpecifierDependency),
    /// Imported and re-exported binding.
    ReexportedImportSpecifier(ReexportDependency),
}

impl Dependency {
    /// A plain module request.
    pub fn request(request: impl Into<String>) -> Self {
        Dependency::Request(RequestDependency {
            request: Some(request.into()),
            ..RequestDependency::default()
        })
    }

    /// A constant replacement with no request.
    pub fn constant() -> Self {
        Dependency::Request(RequestDependency {
            kind: RequestKind::Constant,
            ..RequestDependency::default()
        })
    }
}

/// A variable injected into a block, with the dependencies its expression needs.
#[derive(Debug, Clone, Default)]
pub struct Variable {
    /// Variable name.
    pub name: String,
    /// Expression the variable is bound to.
    pub expression: String,
    /// Dependencies of the expression.
    pub dependencies: Vec<Dependency>,
}

/// A block of dependencies. Modules are blocks; nested blocks are split
/// points (`import()`), possibly loaded asynchronously.
#[derive(Debug, Clone, Default)]
pub struct DependencyBlock {
    /// Whether the block is loaded lazily.
    pub is_async: bool,
    /// Chunk name requested for the block.
    pub chunk_name: Option<String>,
    /// Direct dependencies.
    pub dependencies: Vec<Dependency>,
    /// Injected variables.
    pub variables: Vec<Variable>,
    /// Nested blocks.
    pub blocks: Vec<DependencyBlock>,
}

/// Which exports of a module the current build uses.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "names", rename_all = "snake_case")]
pub enum UsedExports {
    /// Usage has not been determined.
    #[default]
    Unknown,
    /// Every export is used.
    All,
    /// Only these exports are used.
    Some(Vec<String>),
}

/// Used-export information of a module.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExportUsage {
    /// Whether the module is used at all.
    pub used: Option<bool>,
    /// Which exports are used.
    pub used_exports: UsedExports,
}

/// A diagnostic the pipeline attached to a module.
#[derive(Debug, Clone, Default)]
pub struct Diagnostic {
    /// Rendered message.
    pub message: String,
    /// Dependency that caused the diagnostic.
    pub origin: Option<Dependency>,
    /// Dependencies involved.
    pub dependencies: Vec<Dependency>,
}

/// Everything the pipeline knows about one built module.
#[derive(Debug, Clone, Default)]
pub struct ModuleDescriptor {
    /// Unique module identifier (request plus loaders).
    pub identifier: String,
    /// Directory the module's requests are resolved from.
    pub context: String,
    /// Full request including loaders.
    pub request: String,
    /// Request as the user wrote it, resolved.
    pub user_request: String,
    /// Request before resolution.
    pub raw_request: String,
    /// Resolved resource file.
    pub resource: PathBuf,
    /// Loader chain.
    pub loaders: Vec<String>,
    /// When the module was built, in milliseconds since the Unix epoch.
    pub build_timestamp: u64,
    /// Whether the pipeline allows caching this module.
    pub cacheable: bool,
    /// Whether this module was itself restored from the cache.
    pub from_cache: bool,
    /// Whether the module is in strict mode.
    pub strict: bool,
    /// Free-form metadata set by the pipeline.
    pub meta: serde_json::Value,
    /// Used-export information.
    pub usage: ExportUsage,
    /// Source before loaders, when retained.
    pub raw_source: Option<String>,
    /// Generated source.
    pub source: String,
    /// Source map for the generated source.
    pub source_map: Option<String>,
    /// Source map kept regardless of devtool settings.
    pub base_map: Option<String>,
    /// Emitted assets by name.
    pub assets: BTreeMap<String, Vec<u8>>,
    /// Dependency tree.
    pub block: DependencyBlock,
    /// Files that must be watched.
    pub file_dependencies: Vec<PathBuf>,
    /// Directories that must be watched.
    pub context_dependencies: Vec<PathBuf>,
    /// Errors raised while building.
    pub errors: Vec<Diagnostic>,
    /// Warnings raised while building.
    pub warnings: Vec<Diagnostic>,
}

/// Receives the strings a hash contribution emits.
pub trait HashSink {
    /// Feeds one string.
    fn update(&mut self, data: &str);
}

/// A value that contributes to a module hash.
pub trait HashContribution {
    /// Feeds this value's hash input to `sink`, in a stable order.
    fn update_hash(&self, sink: &mut dyn HashSink);
}

impl HashContribution for Dependency {
    fn update_hash(&self, sink: &mut dyn HashSink) {
        match self {
            Dependency::Request(dep) => {
                if let Some(request) = &dep.request {
                    sink.update(request);
                }
                if let Some(re) = &dep.reg_exp {
                    sink.update(re.as_str());
                }
            }
            Dependency::ModuleExport(dep) => {
                sink.update(dep.id.as_deref().unwrap_or(""));
                sink.update(dep.name.as_deref().unwrap_or(""));
            }
            Dependency::ModuleImport(dep) => sink.update(&dep.request),
            Dependency::ImportSpecifier(dep) => {
                sink.update(&dep.request);
                sink.update(dep.id.as_deref().unwrap_or(""));
            }
            Dependency::ReexportedImportSpecifier(dep) => {
                sink.update(&dep.request);
                sink.update(dep.id.as_deref().unwrap_or(""));
                sink.update(dep.name.as_deref().unwrap_or(""));
            }
        }
    }
}

impl HashContribution for DependencyBlock {
    fn update_hash(&self, sink: &mut dyn HashSink) {
        for dep in &self.dependencies {
            dep.update_hash(sink);
        }
        for var in &self.variables {
            sink.update(&var.name);
            sink.update(&var.expression);
            for dep in &var.dependencies {
                dep.update_hash(sink);
            }
        }
        for block in &self.blocks {
            block.update_hash(sink);
        }
    }
}

impl HashContribution for ModuleDescriptor {
    fn update_hash(&self, sink: &mut dyn HashSink) {
        sink.update(&self.identifier);
        sink.update(FileDigest::from_bytes(self.source.as_bytes()).as_str());
        self.block.update_hash(sink);
    }
}
