//! Key-based configuration access.
//!
//! Runtime components look values up by dotted key instead of holding a
//! typed config, so the backing store can be swapped (static file, shared
//! mutable handle, remote config client).

use parking_lot::RwLock;
use serde_json::Value;

use crate::player::PlayerConfig;
use crate::ConfigError;

/// Well-known configuration keys.
pub mod keys {
    pub const BUFFER_MAX_READ_AHEAD_MB: &str = "buffer.max_read_ahead_mb";
    pub const BUFFER_MAX_TIME_SPAN_US: &str = "buffer.max_time_span_us";
    pub const STEPPING_MODE: &str = "stepping.mode";
    pub const STEPPING_CYCLE_ID: &str = "stepping.cycle_id";
    pub const STEPPING_STEP_SIZE_US: &str = "stepping.step_size_us";
    pub const REALTIME_FACTOR: &str = "playback.realtime_factor";
    pub const CHECK_PERIOD_MS: &str = "playback.check_period_ms";
    pub const REPORT_INTERVAL_MS: &str = "playback.report_interval_ms";
    pub const MAX_PACING_WAIT_MS: &str = "playback.max_pacing_wait_ms";
    pub const RECORDING_PATHS: &str = "playback.recording_paths";
    pub const MAX_OPEN_FILES: &str = "readers.max_open_files";
    pub const CHECK_DUPLICATE_DEVICE_NAMES: &str = "readers.check_duplicate_device_names";
    pub const INVALID_PACKAGE_RETRIES: &str = "readers.invalid_package_retries";
    pub const FILTER_EXPRESSIONS: &str = "filters.expressions";
    pub const STATE_THROTTLE_MS: &str = "status.state_throttle_ms";
    pub const OPEN_PROGRESS_THROTTLE_MS: &str = "status.open_progress_throttle_ms";
    pub const PERIODIC_ENABLED: &str = "status.periodic_enabled";
    pub const PERIODIC_INTERVAL_MS: &str = "status.periodic_interval_ms";
    pub const WATCHDOG_ENABLED: &str = "watchdog.enabled";
    pub const TRANSITION_TIMEOUT_MS: &str = "watchdog.transition_timeout_ms";
}

/// Typed lookups over a key/value configuration source.
pub trait ConfigStore: Send + Sync {
    /// Raw value at `key`, if present.
    fn lookup(&self, key: &str) -> Option<Value>;

    /// Store a value at `key`. Read-only stores refuse.
    fn put(&self, key: &str, _value: Value) -> Result<(), ConfigError> {
        Err(ConfigError::ReadOnly(key.to_string()))
    }

    fn get_int(&self, key: &str, default: i64) -> i64 {
        self.lookup(key)
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .unwrap_or(default)
    }

    fn get_uint(&self, key: &str, default: u64) -> u64 {
        self.lookup(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    fn get_float(&self, key: &str, default: f64) -> f64 {
        self.lookup(key).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.lookup(key) {
            Some(Value::Bool(b)) => b,
            Some(Value::String(s)) => parse_bool(&s).unwrap_or(default),
            Some(Value::Number(n)) => n.as_i64().map(|i| i != 0).unwrap_or(default),
            _ => default,
        }
    }

    fn get_string(&self, key: &str, default: &str) -> String {
        match self.lookup(key) {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => default.to_string(),
            Some(other) => other.to_string(),
        }
    }

    fn get_string_list(&self, key: &str) -> Vec<String> {
        match self.lookup(key) {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect(),
            Some(Value::String(s)) if !s.is_empty() => vec![s],
            _ => Vec::new(),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn pointer(key: &str) -> String {
    format!("/{}", key.replace('.', "/"))
}

impl ConfigStore for PlayerConfig {
    fn lookup(&self, key: &str) -> Option<Value> {
        let tree = serde_json::to_value(self).ok()?;
        tree.pointer(&pointer(key)).cloned()
    }
}

/// Mutable, thread-safe configuration handle shared by all player components.
#[derive(Debug, Default)]
pub struct SharedConfig {
    inner: RwLock<PlayerConfig>,
}

impl SharedConfig {
    pub fn new(config: PlayerConfig) -> Self {
        SharedConfig {
            inner: RwLock::new(config),
        }
    }

    /// Copy of the current configuration.
    pub fn snapshot(&self) -> PlayerConfig {
        self.inner.read().clone()
    }

    /// Apply a typed in-place update.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut PlayerConfig),
    {
        f(&mut self.inner.write());
    }

    /// Replace the whole configuration.
    pub fn replace(&self, config: PlayerConfig) {
        *self.inner.write() = config;
    }
}

impl ConfigStore for SharedConfig {
    fn lookup(&self, key: &str) -> Option<Value> {
        self.inner.read().lookup(key)
    }

    fn put(&self, key: &str, value: Value) -> Result<(), ConfigError> {
        let mut guard = self.inner.write();
        let mut tree = serde_json::to_value(&*guard)?;
        let slot = tree
            .pointer_mut(&pointer(key))
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        *slot = value;
        *guard = serde_json::from_value(tree)?;
        Ok(())
    }
}
