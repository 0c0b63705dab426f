//! Config snapshots attached to "recording loaded" events.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::player::PlayerConfig;
use crate::resolve::ConfigSource;

/// Immutable record of the configuration a recording was opened with.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSnapshot {
    pub source: ConfigSource,
    /// SHA-256 of the JSON-serialized config.
    pub config_hash: String,
    pub captured_at: String,
    pub config: PlayerConfig,
}

impl ConfigSnapshot {
    pub fn capture(config: &PlayerConfig, source: ConfigSource) -> Self {
        ConfigSnapshot {
            source,
            config_hash: config_hash(config),
            captured_at: chrono::Utc::now().to_rfc3339(),
            config: config.clone(),
        }
    }
}

/// Hex SHA-256 of the config's JSON form.
pub fn config_hash(config: &PlayerConfig) -> String {
    let json = serde_json::to_vec(config).unwrap_or_default();
    hex::encode(Sha256::digest(&json))
}
