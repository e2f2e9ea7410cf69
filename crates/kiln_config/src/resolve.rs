//! Resolution of a [`CacheConfig`] into concrete paths.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::types::{CacheConfig, EnvironmentInputs, EnvironmentPaths, CONFIG_HASH_PLACEHOLDER};

/// A cache configuration with its directory template substituted and all
/// paths made absolute against a base directory.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute cache root.
    pub cache_root: PathBuf,
    /// The evaluated config hash, if any.
    pub config_hash: Option<String>,
    /// Whether the config hash is part of `cache_root`.
    pub hash_in_directory: bool,
    /// Environment inputs with `root` filled in, or `None` when disabled.
    pub environment: Option<EnvironmentInputs>,
}

impl ResolvedConfig {
    /// Returns the config hash to append to the environment fingerprint.
    ///
    /// When the hash is already part of the directory it is not repeated in
    /// the stamp: a different hash means a different directory anyway.
    pub fn stamp_suffix(&self) -> Option<&str> {
        if self.hash_in_directory {
            None
        } else {
            self.config_hash.as_deref()
        }
    }
}

impl CacheConfig {
    /// Resolves the configuration against `base_dir`.
    ///
    /// `build_options` is the host's build configuration, passed to a derived
    /// config hash.
    pub fn resolve(
        &self,
        base_dir: &Path,
        build_options: &serde_json::Value,
    ) -> Result<ResolvedConfig, ConfigError> {
        let template = self
            .cache_directory
            .as_deref()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| ConfigError::MissingField("cache.directory".to_string()))?;

        let config_hash = self
            .config_hash
            .as_ref()
            .and_then(|h| h.evaluate(build_options));
        let hash_in_directory = template.contains(CONFIG_HASH_PLACEHOLDER);

        let directory = if hash_in_directory {
            let hash = config_hash
                .as_deref()
                .ok_or_else(|| ConfigError::MissingConfigHash {
                    directory: template.to_string(),
                })?;
            template.replacen(CONFIG_HASH_PLACEHOLDER, hash, 1)
        } else {
            template.to_string()
        };

        let environment = match &self.environment_paths {
            EnvironmentPaths::Disabled => None,
            EnvironmentPaths::Inputs(inputs) => {
                let root = match &inputs.root {
                    Some(r) => base_dir.join(r),
                    None => base_dir.to_path_buf(),
                };
                Some(EnvironmentInputs {
                    root: Some(root),
                    ..inputs.clone()
                })
            }
        };

        Ok(ResolvedConfig {
            cache_root: base_dir.join(directory),
            config_hash,
            hash_in_directory,
            environment,
        })
    }
}
