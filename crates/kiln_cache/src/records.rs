//! Plain, persistable records of modules, dependencies and resolutions.
//!
//! Records hold no live handles: locations are copied by value and regular
//! expressions are stored as their pattern text. They are written as JSON.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::graph::{ExportUsage, SourceLocation};

/// A persisted dependency, tagged by variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DependencyRecord {
    /// A plain request, context or constant dependency.
    Request {
        /// The raw request, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request: Option<String>,
        /// Resolved as a directory context.
        #[serde(default)]
        context: bool,
        /// Flagged critical by the host.
        #[serde(default)]
        critical: bool,
        /// Context recursion flag.
        #[serde(default)]
        recursive: bool,
        /// Context filter pattern.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reg_exp: Option<String>,
        /// Source location.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
        /// A constant/no-op dependency.
        #[serde(default)]
        constant: bool,
    },
    /// An export declared by the module.
    ModuleExport {
        /// Exported local identifier.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Exported name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Precedence.
        #[serde(default)]
        precedence: u32,
    },
    /// An import statement.
    ModuleImport {
        /// Imported request.
        request: String,
    },
    /// A binding imported through an import statement.
    ImportSpecifier {
        /// Request of the import statement.
        request: String,
        /// Imported identifier.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Local name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Source location.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        loc: Option<SourceLocation>,
    },
    /// A binding imported and re-exported.
    ReexportedImportSpecifier {
        /// Request of the import statement.
        request: String,
        /// Imported identifier.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Exported name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl DependencyRecord {
    /// The request this dependency resolves, if its target must exist.
    ///
    /// Context dependencies are re-validated by the host and constants
    /// resolve to nothing, so neither has a checked request.
    pub fn checked_request(&self) -> Option<&str> {
        match self {
            DependencyRecord::Request {
                request: Some(request),
                context: false,
                constant: false,
                ..
            } => Some(request),
            DependencyRecord::ModuleImport { request } => Some(request),
            _ => None,
        }
    }
}

/// A persisted variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableRecord {
    /// Variable name.
    pub name: String,
    /// Bound expression.
    pub expression: String,
    /// Dependencies of the expression.
    pub dependencies: Vec<DependencyRecord>,
}

/// A persisted dependency block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Loaded lazily.
    #[serde(default)]
    pub is_async: bool,
    /// Requested chunk name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_name: Option<String>,
    /// Direct dependencies.
    #[serde(default)]
    pub dependencies: Vec<DependencyRecord>,
    /// Injected variables.
    #[serde(default)]
    pub variables: Vec<VariableRecord>,
    /// Nested blocks.
    #[serde(default)]
    pub blocks: Vec<BlockRecord>,
}

impl BlockRecord {
    /// Visits every dependency in the tree, including variable dependencies,
    /// depth first in declaration order.
    pub fn for_each_dependency<'a>(&'a self, f: &mut impl FnMut(&'a DependencyRecord)) {
        for dep in &self.dependencies {
            f(dep);
        }
        for var in &self.variables {
            for dep in &var.dependencies {
                f(dep);
            }
        }
        for block in &self.blocks {
            block.for_each_dependency(f);
        }
    }
}

/// A persisted diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    /// Rendered message.
    pub message: String,
    /// Dependency that caused it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<DependencyRecord>,
    /// Dependencies involved.
    #[serde(default)]
    pub dependencies: Vec<DependencyRecord>,
}

/// A cached module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    /// Module identifier without the scope prefix.
    pub identifier: String,
    /// Resolution context.
    pub context: String,
    /// Full request with loaders.
    pub request: String,
    /// Resolved user request.
    pub user_request: String,
    /// Unresolved request.
    pub raw_request: String,
    /// Resolved resource file.
    pub resource: PathBuf,
    /// Loader chain.
    #[serde(default)]
    pub loaders: Vec<String>,
    /// Names of emitted assets; bytes live in the asset tier.
    #[serde(default)]
    pub assets: Vec<String>,
    /// Build time in milliseconds since the Unix epoch.
    pub build_timestamp: u64,
    /// Strict mode flag.
    #[serde(default)]
    pub strict: bool,
    /// Host metadata.
    #[serde(default)]
    pub meta: serde_json::Value,
    /// Used-export information at the time of caching.
    #[serde(default)]
    pub usage: ExportUsage,
    /// Source before loaders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_source: Option<String>,
    /// Generated source.
    pub source: String,
    /// Source map of the generated source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_map: Option<String>,
    /// Base source map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_map: Option<String>,
    /// Concatenated hash contributions of the module.
    pub hash_content: String,
    /// Dependency tree.
    pub tree: BlockRecord,
    /// Files to watch.
    #[serde(default)]
    pub file_dependencies: Vec<PathBuf>,
    /// Directories to watch.
    #[serde(default)]
    pub context_dependencies: Vec<PathBuf>,
    /// Build errors.
    #[serde(default)]
    pub errors: Vec<DiagnosticRecord>,
    /// Build warnings.
    #[serde(default)]
    pub warnings: Vec<DiagnosticRecord>,
    /// Set when the record must not be reused.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub invalid: bool,
}

impl ModuleRecord {
    /// Every watched file and directory.
    pub fn watched_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.file_dependencies
            .iter()
            .chain(self.context_dependencies.iter())
    }
}

/// A cached resolution of `(context, request)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    /// Context the request was resolved from.
    pub context: String,
    /// The raw request.
    pub request: String,
    /// Absolute path of the resolved file.
    pub user_request: PathBuf,
    /// Resource with query, if it differs from `user_request`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Loaders applied to the request.
    #[serde(default)]
    pub loaders: Vec<String>,
    /// Resolver metadata.
    #[serde(default)]
    pub resolver_meta: serde_json::Value,
    /// Parser configuration needed to rebuild the resolution.
    #[serde(default)]
    pub parser_options: serde_json::Value,
}
