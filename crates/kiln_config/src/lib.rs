//! Parsing and resolution of the cache configuration.
//!
//! This crate reads the `[cache]` table of a `kiln.toml` file (or accepts a
//! programmatically built [`CacheConfig`]) and resolves it into concrete
//! paths: the cache root with its `[confighash]` placeholder substituted, and
//! the environment-fingerprint inputs.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod resolve;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, CONFIG_FILE};
pub use resolve::ResolvedConfig;
pub use types::*;
