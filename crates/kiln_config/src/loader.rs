//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::{CacheConfig, KilnFile};
use std::path::Path;

/// Name of the configuration file looked up in a project directory.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Loads and validates `kiln.toml` from a project directory.
pub fn load_config(project_dir: &Path) -> Result<CacheConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `kiln.toml` configuration from a string.
///
/// A missing `[cache].directory` is not an error here: the engine disables
/// itself for the run when it has no directory.
pub fn load_config_from_str(content: &str) -> Result<CacheConfig, ConfigError> {
    let file: KilnFile =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&file)?;
    Ok(file.cache.into())
}

fn validate_config(file: &KilnFile) -> Result<(), ConfigError> {
    if file.cache.config_hash.as_deref() == Some("") {
        return Err(ConfigError::ValidationError(
            "cache.config_hash must not be empty".to_string(),
        ));
    }
    if file.cache.directory.as_deref() == Some("") {
        return Err(ConfigError::MissingField("cache.directory".to_string()));
    }
    Ok(())
}
