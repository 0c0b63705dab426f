//! recplay configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for the player configuration file
//! - Config resolution (CLI → env → user config dir → defaults)
//! - Semantic validation
//! - Key-based lookups through [`ConfigStore`] and a shared mutable handle
//! - Config snapshots for "recording loaded" events
//! - Configuration presets for common replay setups

pub mod player;
pub mod preset;
pub mod resolve;
pub mod snapshot;
pub mod store;
pub mod validate;

use std::path::PathBuf;

pub use player::PlayerConfig;
pub use preset::{get_preset, list_presets, PresetError, PresetInfo, PresetName};
pub use resolve::{resolve_config, ConfigPaths, ConfigSource, ResolvedConfig};
pub use snapshot::ConfigSnapshot;
pub use store::{keys, ConfigStore, SharedConfig};
pub use validate::{validate, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";

/// Errors raised while loading or updating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error in {}: {message}", path.display())]
    Toml { path: PathBuf, message: String },

    #[error("unknown config key: {0}")]
    UnknownKey(String),

    #[error("config store is read-only, cannot set {0}")]
    ReadOnly(String),
}

impl From<ConfigError> for rp_common::Error {
    fn from(err: ConfigError) -> Self {
        rp_common::Error::Config(err.to_string())
    }
}

/// JSON Schema for the configuration file.
pub fn config_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(PlayerConfig)).unwrap_or_default()
}
