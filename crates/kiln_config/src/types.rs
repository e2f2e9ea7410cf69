//! Configuration types for the build cache.
//!
//! [`KilnFile`] mirrors the on-disk `kiln.toml`; [`CacheConfig`] is the
//! programmatic form consumed by the cache engine. The two differ only in
//! that a [`CacheConfig`] may carry a derived config hash (a closure over the
//! host's build configuration), which cannot be written in TOML.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

/// Placeholder in the cache directory template replaced by the config hash.
pub const CONFIG_HASH_PLACEHOLDER: &str = "[confighash]";

/// The top-level layout of `kiln.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct KilnFile {
    /// Cache settings.
    #[serde(default)]
    pub cache: CacheSection,
}

/// The `[cache]` table of `kiln.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    /// Cache root directory, possibly containing `[confighash]`.
    #[serde(default)]
    pub directory: Option<String>,
    /// Literal configuration hash.
    #[serde(default)]
    pub config_hash: Option<String>,
    /// Environment fingerprint inputs, or `false` to disable fingerprinting.
    #[serde(default)]
    pub environment_paths: EnvironmentPaths,
}

/// Files and directories whose state makes up the environment fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentInputs {
    /// Directory the relative entries are resolved against. Defaults to the
    /// base directory the configuration is resolved with.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Files hashed by content.
    #[serde(default = "default_environment_files")]
    pub files: Vec<String>,
    /// Directories whose immediate entries are fingerprinted by name and
    /// modification time.
    #[serde(default = "default_environment_directories")]
    pub directories: Vec<String>,
}

impl Default for EnvironmentInputs {
    fn default() -> Self {
        Self {
            root: None,
            files: default_environment_files(),
            directories: default_environment_directories(),
        }
    }
}

fn default_environment_files() -> Vec<String> {
    vec!["package.json".to_string()]
}

fn default_environment_directories() -> Vec<String> {
    vec!["node_modules".to_string()]
}

/// Whether and from what the environment fingerprint is computed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawEnvironmentPaths")]
pub enum EnvironmentPaths {
    /// Fingerprinting disabled; the environment contributes `""`.
    Disabled,
    /// Fingerprint the given inputs.
    Inputs(EnvironmentInputs),
}

impl Default for EnvironmentPaths {
    fn default() -> Self {
        EnvironmentPaths::Inputs(EnvironmentInputs::default())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEnvironmentPaths {
    Flag(bool),
    Inputs(EnvironmentInputs),
}

impl From<RawEnvironmentPaths> for EnvironmentPaths {
    fn from(raw: RawEnvironmentPaths) -> Self {
        match raw {
            RawEnvironmentPaths::Flag(false) => EnvironmentPaths::Disabled,
            RawEnvironmentPaths::Flag(true) => EnvironmentPaths::default(),
            RawEnvironmentPaths::Inputs(inputs) => EnvironmentPaths::Inputs(inputs),
        }
    }
}

/// Function computing a config hash from the host's build configuration.
pub type ConfigHashFn = dyn Fn(&serde_json::Value) -> Option<String> + Send + Sync;

/// Source of the configuration hash.
#[derive(Clone)]
pub enum ConfigHash {
    /// A fixed string.
    Literal(String),
    /// Computed from the host's build configuration.
    Derived(Arc<ConfigHashFn>),
}

impl ConfigHash {
    /// Wraps a closure as a derived config hash.
    pub fn derived<F>(f: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Option<String> + Send + Sync + 'static,
    {
        ConfigHash::Derived(Arc::new(f))
    }

    /// Evaluates the hash. Empty results count as no hash.
    pub fn evaluate(&self, build_options: &serde_json::Value) -> Option<String> {
        let hash = match self {
            ConfigHash::Literal(s) => Some(s.clone()),
            ConfigHash::Derived(f) => f(build_options),
        };
        hash.filter(|h| !h.is_empty())
    }
}

impl fmt::Debug for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigHash::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            ConfigHash::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

/// Cache configuration consumed by the engine.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Cache root directory template. `None` disables the cache.
    pub cache_directory: Option<String>,
    /// Optional configuration hash.
    pub config_hash: Option<ConfigHash>,
    /// Environment fingerprint inputs.
    pub environment_paths: EnvironmentPaths,
}

impl CacheConfig {
    /// Creates a configuration rooted at `directory` with default
    /// environment inputs and no config hash.
    pub fn new(directory: impl Into<String>) -> Self {
        Self {
            cache_directory: Some(directory.into()),
            config_hash: None,
            environment_paths: EnvironmentPaths::default(),
        }
    }

    /// Sets the configuration hash.
    pub fn with_config_hash(mut self, hash: ConfigHash) -> Self {
        self.config_hash = Some(hash);
        self
    }

    /// Sets the environment fingerprint inputs.
    pub fn with_environment_paths(mut self, paths: EnvironmentPaths) -> Self {
        self.environment_paths = paths;
        self
    }

    /// Returns `true` if the directory template embeds the config hash.
    pub fn config_hash_in_directory(&self) -> bool {
        self.cache_directory
            .as_deref()
            .is_some_and(|d| d.contains(CONFIG_HASH_PLACEHOLDER))
    }
}

impl From<CacheSection> for CacheConfig {
    fn from(section: CacheSection) -> Self {
        Self {
            cache_directory: section.directory,
            config_hash: section.config_hash.map(ConfigHash::Literal),
            environment_paths: section.environment_paths,
        }
    }
}
