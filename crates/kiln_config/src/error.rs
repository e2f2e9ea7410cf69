//! Error types for configuration loading and resolution.

/// Errors that can occur when loading or resolving the cache configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An I/O error occurred while reading the configuration file.
    #[error("failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// The TOML content could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// A required field is missing from the configuration.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// The cache directory uses `[confighash]` but no hash could be computed.
    #[error("cache directory '{directory}' uses [confighash] but no config hash is available")]
    MissingConfigHash {
        /// The unresolved directory template.
        directory: String,
    },

    /// A configuration value failed validation.
    #[error("validation error: {0}")]
    ValidationError(String),
}
