//! Locating the project and its cache configuration.

use std::path::{Path, PathBuf};

use kiln_config::{CacheConfig, ResolvedConfig, CONFIG_FILE};

use crate::GlobalArgs;

/// A project directory and its loaded cache configuration.
pub struct Project {
    /// Directory containing `kiln.toml`; relative cache paths resolve here.
    pub root: PathBuf,
    /// The parsed configuration.
    pub config: CacheConfig,
}

impl Project {
    /// Resolves the cache directory and fingerprint inputs.
    ///
    /// The CLI has no build configuration to feed a derived config hash, so
    /// only literal hashes from `kiln.toml` apply.
    pub fn resolve(&self) -> Result<ResolvedConfig, Box<dyn std::error::Error>> {
        Ok(self.config.resolve(&self.root, &serde_json::Value::Null)?)
    }
}

/// Walks up from `start` looking for the nearest directory containing `kiln.toml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE).exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(format!(
                "could not find {CONFIG_FILE} in {} or any parent directory",
                start.display()
            )
            .into());
        }
    }
}

/// Loads the project selected by the global flags.
///
/// `--config` may name a configuration file (its directory becomes the
/// project root) or a project directory. Without it, the nearest `kiln.toml`
/// above the current directory is used.
pub fn load_project(global: &GlobalArgs) -> Result<Project, Box<dyn std::error::Error>> {
    match global.config {
        Some(ref config_path) => {
            let p = PathBuf::from(config_path);
            if p.is_file() {
                let root = p
                    .parent()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| PathBuf::from("."));
                let content = std::fs::read_to_string(&p)?;
                let config = kiln_config::load_config_from_str(&content)?;
                Ok(Project { root, config })
            } else {
                let config = kiln_config::load_config(&p)?;
                Ok(Project { root: p, config })
            }
        }
        None => {
            let root = find_project_root(&std::env::current_dir()?)?;
            let config = kiln_config::load_config(&root)?;
            Ok(Project { root, config })
        }
    }
}
