//! Conversion between the live dependency graph and persistable records.

use regex::Regex;

use crate::error::CacheError;
use crate::graph::{
    Dependency, DependencyBlock, Diagnostic, ExportDependency, HashContribution, HashSink,
    ImportDependency, ImportSpecifierDependency, ModuleDescriptor, ReexportDependency,
    RequestDependency, RequestKind, Variable,
};
use crate::records::{BlockRecord, DependencyRecord, DiagnosticRecord, ModuleRecord, VariableRecord};

/// Deepest block nesting accepted by the serializer.
///
/// Each nested block adds two levels to a module record's JSON, which must
/// stay within `serde_json`'s recursion limit of 128 to load again.
pub const MAX_BLOCK_DEPTH: usize = 48;

/// Optional dependency kinds supported by the host, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// The host produces import statement and import specifier dependencies.
    pub module_imports: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            module_imports: true,
        }
    }
}

/// Turns live graph objects into records and back.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencySerializer {
    capabilities: Capabilities,
}

impl DependencySerializer {
    /// Creates a serializer for a host with the given capabilities.
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }

    /// Serializes one dependency.
    ///
    /// Returns `None` for dependencies carrying no request, no export
    /// identity and no constant marker, and for import kinds the host does
    /// not support.
    pub fn serialize_dependency(&self, dep: &Dependency) -> Option<DependencyRecord> {
        match dep {
            Dependency::Request(d) => {
                let constant = d.kind == RequestKind::Constant;
                if d.request.is_none() && !constant {
                    return None;
                }
                Some(DependencyRecord::Request {
                    request: d.request.clone(),
                    context: d.kind == RequestKind::Context,
                    critical: d.critical,
                    recursive: d.recursive,
                    reg_exp: d.reg_exp.as_ref().map(|re| re.as_str().to_string()),
                    loc: d.loc,
                    constant,
                })
            }
            Dependency::ModuleExport(d) => {
                if d.id.is_none() && d.name.is_none() {
                    return None;
                }
                Some(DependencyRecord::ModuleExport {
                    id: d.id.clone(),
                    name: d.name.clone(),
                    precedence: d.precedence,
                })
            }
            Dependency::ModuleImport(d) if self.capabilities.module_imports => {
                Some(DependencyRecord::ModuleImport {
                    request: d.request.clone(),
                })
            }
            // Without import support the statement is an ordinary request.
            Dependency::ModuleImport(d) => Some(DependencyRecord::Request {
                request: Some(d.request.clone()),
                context: false,
                critical: false,
                recursive: false,
                reg_exp: None,
                loc: None,
                constant: false,
            }),
            Dependency::ImportSpecifier(d) if self.capabilities.module_imports => {
                Some(DependencyRecord::ImportSpecifier {
                    request: d.request.clone(),
                    id: d.id.clone(),
                    name: d.name.clone(),
                    loc: d.loc,
                })
            }
            Dependency::ReexportedImportSpecifier(d) if self.capabilities.module_imports => {
                Some(DependencyRecord::ReexportedImportSpecifier {
                    request: d.request.clone(),
                    id: d.id.clone(),
                    name: d.name.clone(),
                })
            }
            Dependency::ImportSpecifier(_) | Dependency::ReexportedImportSpecifier(_) => None,
        }
    }

    /// Serializes a dependency list, dropping uninformative entries.
    pub fn serialize_dependencies(&self, deps: &[Dependency]) -> Vec<DependencyRecord> {
        deps.iter()
            .filter_map(|d| self.serialize_dependency(d))
            .collect()
    }

    /// Serializes injected variables.
    pub fn serialize_variables(&self, vars: &[Variable]) -> Vec<VariableRecord> {
        vars.iter()
            .map(|v| VariableRecord {
                name: v.name.clone(),
                expression: v.expression.clone(),
                dependencies: self.serialize_dependencies(&v.dependencies),
            })
            .collect()
    }

    /// Serializes a block tree.
    pub fn serialize_block(&self, block: &DependencyBlock) -> Result<BlockRecord, CacheError> {
        self.serialize_block_at(block, 0)
    }

    fn serialize_block_at(&self, block: &DependencyBlock, depth: usize) -> Result<BlockRecord, CacheError> {
        if depth > MAX_BLOCK_DEPTH {
            return Err(CacheError::serialization(format!(
                "dependency blocks nested deeper than {MAX_BLOCK_DEPTH}"
            )));
        }
        Ok(BlockRecord {
            is_async: block.is_async,
            chunk_name: block.chunk_name.clone(),
            dependencies: self.serialize_dependencies(&block.dependencies),
            variables: self.serialize_variables(&block.variables),
            blocks: block
                .blocks
                .iter()
                .map(|b| self.serialize_block_at(b, depth + 1))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Serializes a diagnostic.
    pub fn serialize_diagnostic(&self, diagnostic: &Diagnostic) -> DiagnosticRecord {
        DiagnosticRecord {
            message: diagnostic.message.clone(),
            origin: diagnostic
                .origin
                .as_ref()
                .and_then(|d| self.serialize_dependency(d)),
            dependencies: self.serialize_dependencies(&diagnostic.dependencies),
        }
    }

    /// Serializes a built module into a cache record.
    pub fn serialize_module(&self, module: &ModuleDescriptor) -> Result<ModuleRecord, CacheError> {
        Ok(ModuleRecord {
            identifier: module.identifier.clone(),
            context: module.context.clone(),
            request: module.request.clone(),
            user_request: module.user_request.clone(),
            raw_request: module.raw_request.clone(),
            resource: module.resource.clone(),
            loaders: module.loaders.clone(),
            assets: module.assets.keys().cloned().collect(),
            build_timestamp: module.build_timestamp,
            strict: module.strict,
            meta: module.meta.clone(),
            usage: module.usage.clone(),
            raw_source: module.raw_source.clone(),
            source: module.source.clone(),
            source_map: module.source_map.clone(),
            base_map: module.base_map.clone(),
            hash_content: serialize_hash_content(module),
            tree: self.serialize_block(&module.block)?,
            file_dependencies: module.file_dependencies.clone(),
            context_dependencies: module.context_dependencies.clone(),
            errors: module.errors.iter().map(|d| self.serialize_diagnostic(d)).collect(),
            warnings: module.warnings.iter().map(|d| self.serialize_diagnostic(d)).collect(),
            invalid: false,
        })
    }
}

#[derive(Default)]
struct CapturingSink(String);

impl HashSink for CapturingSink {
    fn update(&mut self, data: &str) {
        self.0.push_str(data);
    }
}

/// Captures everything `value` feeds to a hash, in emission order.
pub fn serialize_hash_content<H: HashContribution + ?Sized>(value: &H) -> String {
    let mut sink = CapturingSink::default();
    value.update_hash(&mut sink);
    sink.0
}

impl Dependency {
    /// Rebuilds a live dependency from its record.
    pub fn from_record(record: &DependencyRecord) -> Result<Self, CacheError> {
        Ok(match record {
            DependencyRecord::Request {
                request,
                context,
                critical,
                recursive,
                reg_exp,
                loc,
                constant,
            } => Dependency::Request(RequestDependency {
                request: request.clone(),
                kind: if *constant {
                    RequestKind::Constant
                } else if *context {
                    RequestKind::Context
                } else {
                    RequestKind::Module
                },
                critical: *critical,
                recursive: *recursive,
                reg_exp: reg_exp
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(CacheError::serialization)?,
                loc: *loc,
            }),
            DependencyRecord::ModuleExport {
                id,
                name,
                precedence,
            } => Dependency::ModuleExport(ExportDependency {
                id: id.clone(),
                name: name.clone(),
                precedence: *precedence,
            }),
            DependencyRecord::ModuleImport { request } => {
                Dependency::ModuleImport(ImportDependency {
                    request: request.clone(),
                })
            }
            DependencyRecord::ImportSpecifier {
                request,
                id,
                name,
                loc,
            } => Dependency::ImportSpecifier(ImportSpecifierDependency {
                request: request.clone(),
                id: id.clone(),
                name: name.clone(),
                loc: *loc,
            }),
            DependencyRecord::ReexportedImportSpecifier { request, id, name } => {
                Dependency::ReexportedImportSpecifier(ReexportDependency {
                    request: request.clone(),
                    id: id.clone(),
                    name: name.clone(),
                })
            }
        })
    }
}

impl DependencyBlock {
    /// Rebuilds a live block tree from its record.
    pub fn from_record(record: &BlockRecord) -> Result<Self, CacheError> {
        let deps = |records: &[DependencyRecord]| -> Result<Vec<Dependency>, CacheError> {
            records.iter().map(Dependency::from_record).collect()
        };
        Ok(DependencyBlock {
            is_async: record.is_async,
            chunk_name: record.chunk_name.clone(),
            dependencies: deps(&record.dependencies)?,
            variables: record
                .variables
                .iter()
                .map(|v| {
                    Ok(Variable {
                        name: v.name.clone(),
                        expression: v.expression.clone(),
                        dependencies: deps(&v.dependencies)?,
                    })
                })
                .collect::<Result<_, CacheError>>()?,
            blocks: record
                .blocks
                .iter()
                .map(DependencyBlock::from_record)
                .collect::<Result<_, _>>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Position, SourceLocation};

    fn loc(line: u32) -> Option<SourceLocation> {
        Some(SourceLocation {
            start: Position { line, column: 0 },
            end: Some(Position { line, column: 10 }),
        })
    }

    fn sample_block() -> DependencyBlock {
        DependencyBlock {
            dependencies: vec![
                Dependency::request("./a"),
                Dependency::constant(),
                Dependency::Request(RequestDependency::default()),
                Dependency::Request(RequestDependency {
                    request: Some("./locales".into()),
                    kind: RequestKind::Context,
                    recursive: true,
                    reg_exp: Some(Regex::new(r"\.json$").unwrap()),
                    loc: loc(3),
                    ..RequestDependency::default()
                }),
                Dependency::ModuleExport(ExportDependency::default()),
                Dependency::ModuleExport(ExportDependency {
                    id: Some("x".into()),
                    name: Some("default".into()),
                    precedence: 1,
                }),
                Dependency::ModuleImport(ImportDependency {
                    request: "./b".into(),
                }),
                Dependency::ImportSpecifier(ImportSpecifierDependency {
                    request: "./b".into(),
                    id: Some("f".into()),
                    name: Some("f".into()),
                    loc: loc(5),
                }),
            ],
            variables: vec![Variable {
                name: "process".into(),
                expression: "require('process')".into(),
                dependencies: vec![Dependency::request("process")],
            }],
            blocks: vec![DependencyBlock {
                is_async: true,
                chunk_name: Some("lazy".into()),
                dependencies: vec![Dependency::request("./lazy")],
                ..DependencyBlock::default()
            }],
            ..DependencyBlock::default()
        }
    }

    #[test]
    fn drops_uninformative_dependencies() {
        let record = DependencySerializer::default()
            .serialize_block(&sample_block())
            .unwrap();
        // The empty request and the anonymous export are dropped.
        assert_eq!(record.dependencies.len(), 6);
        assert!(matches!(
            record.dependencies[1],
            DependencyRecord::Request { constant: true, .. }
        ));
    }

    #[test]
    fn reconstruct_then_serialize_is_idempotent() {
        let serializer = DependencySerializer::default();
        let first = serializer.serialize_block(&sample_block()).unwrap();
        let rebuilt = DependencyBlock::from_record(&first).unwrap();
        let second = serializer.serialize_block(&rebuilt).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn regex_is_stored_as_pattern_text() {
        let record = DependencySerializer::default()
            .serialize_block(&sample_block())
            .unwrap();
        match &record.dependencies[2] {
            DependencyRecord::Request { reg_exp, context, .. } => {
                assert_eq!(reg_exp.as_deref(), Some(r"\.json$"));
                assert!(*context);
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn bad_pattern_fails_reconstruction() {
        let record = DependencyRecord::Request {
            request: Some("./dir".into()),
            context: true,
            critical: false,
            recursive: false,
            reg_exp: Some("(".into()),
            loc: None,
            constant: false,
        };
        assert!(matches!(
            Dependency::from_record(&record),
            Err(CacheError::Serialization { .. })
        ));
    }

    #[test]
    fn without_import_support_imports_become_requests() {
        let serializer = DependencySerializer::new(Capabilities {
            module_imports: false,
        });
        let record = serializer.serialize_block(&sample_block()).unwrap();
        assert!(record
            .dependencies
            .iter()
            .all(|d| !matches!(d, DependencyRecord::ModuleImport { .. } | DependencyRecord::ImportSpecifier { .. })));
        assert!(record.dependencies.iter().any(|d| matches!(
            d,
            DependencyRecord::Request { request: Some(r), .. } if r == "./b"
        )));
    }

    #[test]
    fn excessive_nesting_is_rejected() {
        let mut block = DependencyBlock::default();
        for _ in 0..=MAX_BLOCK_DEPTH {
            block = DependencyBlock {
                blocks: vec![block],
                ..DependencyBlock::default()
            };
        }
        assert!(DependencySerializer::default().serialize_block(&block).is_err());
    }

    #[test]
    fn deepest_accepted_tree_loads_back() {
        let mut block = DependencyBlock {
            dependencies: vec![Dependency::Request(RequestDependency {
                request: Some("./leaf".into()),
                loc: loc(1),
                ..RequestDependency::default()
            })],
            ..DependencyBlock::default()
        };
        for _ in 0..MAX_BLOCK_DEPTH {
            block = DependencyBlock {
                blocks: vec![block],
                ..DependencyBlock::default()
            };
        }
        let module = ModuleDescriptor {
            identifier: "/p/deep.js".into(),
            request: "/p/deep.js".into(),
            block,
            ..ModuleDescriptor::default()
        };

        let record = DependencySerializer::default().serialize_module(&module).unwrap();
        let bytes = serde_json::to_vec(&record).unwrap();
        let loaded: ModuleRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(loaded, record);
        let rebuilt = DependencyBlock::from_record(&loaded.tree).unwrap();
        assert_eq!(
            DependencySerializer::default().serialize_block(&rebuilt).unwrap(),
            record.tree
        );
    }

    #[test]
    fn hash_content_captures_emission_order() {
        let module = ModuleDescriptor {
            identifier: "/p/a.js".into(),
            source: "1".into(),
            block: DependencyBlock {
                dependencies: vec![Dependency::request("./b")],
                ..DependencyBlock::default()
            },
            ..ModuleDescriptor::default()
        };
        let content = serialize_hash_content(&module);
        assert!(content.starts_with("/p/a.js"));
        assert!(content.ends_with("./b"));
        assert_eq!(content, serialize_hash_content(&module));
    }

    #[test]
    fn module_record_lists_asset_names_and_diagnostics() {
        let mut module = ModuleDescriptor {
            identifier: "/p/a.js".into(),
            ..ModuleDescriptor::default()
        };
        module.assets.insert("img.png".into(), vec![1, 2, 3]);
        module.errors.push(Diagnostic {
            message: "boom".into(),
            origin: Some(Dependency::request("./x")),
            dependencies: vec![Dependency::request("./x")],
        });

        let record = DependencySerializer::default().serialize_module(&module).unwrap();
        assert_eq!(record.assets, ["img.png"]);
        assert_eq!(record.errors[0].message, "boom");
        assert!(record.errors[0].origin.is_some());
        assert!(!record.invalid);
    }
}
