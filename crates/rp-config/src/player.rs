//! Player configuration types.
//!
//! Every section carries `#[serde(default)]` so a config file only needs the
//! keys it wants to override.

use rp_common::SteppingKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::CONFIG_SCHEMA_VERSION;

/// Default read-ahead byte budget in megabytes.
pub const DEFAULT_MAX_READ_AHEAD_MB: i64 = 30;

/// Default ceiling on buffered simulated time, in µs.
pub const DEFAULT_MAX_TIME_SPAN_US: u64 = 20_000_000;

/// Complete player configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PlayerConfig {
    pub schema_version: String,
    pub buffer: BufferSettings,
    pub stepping: SteppingSettings,
    pub playback: PlaybackSettings,
    pub readers: ReaderSettings,
    pub filters: FilterSettings,
    pub status: StatusSettings,
    pub watchdog: WatchdogSettings,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            schema_version: CONFIG_SCHEMA_VERSION.to_string(),
            buffer: BufferSettings::default(),
            stepping: SteppingSettings::default(),
            playback: PlaybackSettings::default(),
            readers: ReaderSettings::default(),
            filters: FilterSettings::default(),
            status: StatusSettings::default(),
            watchdog: WatchdogSettings::default(),
        }
    }
}

/// Read-ahead buffer limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BufferSettings {
    /// Byte budget in MB. Zero or negative selects the default.
    pub max_read_ahead_mb: i64,
    /// Maximum span of simulated time held in the buffer, in µs.
    pub max_time_span_us: u64,
}

impl Default for BufferSettings {
    fn default() -> Self {
        BufferSettings {
            max_read_ahead_mb: DEFAULT_MAX_READ_AHEAD_MB,
            max_time_span_us: DEFAULT_MAX_TIME_SPAN_US,
        }
    }
}

impl BufferSettings {
    /// Effective byte budget.
    pub fn max_bytes(&self) -> u64 {
        mb_to_bytes(self.max_read_ahead_mb)
    }
}

/// Convert a configured MB value to bytes, falling back to the default for
/// non-positive input.
pub fn mb_to_bytes(mb: i64) -> u64 {
    let mb = if mb > 0 { mb } else { DEFAULT_MAX_READ_AHEAD_MB };
    (mb as u64).saturating_mul(1024 * 1024)
}

/// What one step means during playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SteppingSettings {
    pub mode: SteppingKind,
    /// Monitored cycle id for `cycle_id` mode.
    pub cycle_id: u32,
    /// Simulated µs per step for `timestamp` mode.
    pub step_size_us: u64,
}

impl Default for SteppingSettings {
    fn default() -> Self {
        SteppingSettings {
            mode: SteppingKind::Package,
            cycle_id: 0,
            step_size_us: 100,
        }
    }
}

/// Pacing and command-line playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Target ratio of simulated to wall time. Zero or negative disables pacing.
    pub realtime_factor: f64,
    /// Minimum interval between pacing checks.
    pub check_period_ms: u64,
    /// Interval between effective-speed measurements.
    pub report_interval_ms: u64,
    /// Upper bound on a single pacing sleep.
    pub max_pacing_wait_ms: u64,
    /// Recording opened by `recplay play` when no paths are given.
    pub recording_paths: Vec<PathBuf>,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        PlaybackSettings {
            realtime_factor: 10.0,
            check_period_ms: 25,
            report_interval_ms: 500,
            max_pacing_wait_ms: 2_000,
            recording_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ReaderSettings {
    pub max_open_files: usize,
    /// Reject recordings where two readers report the same device name.
    pub check_duplicate_device_names: bool,
    /// Extra pulls when a reader batch contains only invalid packages.
    pub invalid_package_retries: u32,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        ReaderSettings {
            max_open_files: 20,
            check_duplicate_device_names: false,
            invalid_package_retries: 1,
        }
    }
}

/// Reader-side filter expressions, OR-combined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FilterSettings {
    pub expressions: Vec<String>,
}

impl FilterSettings {
    /// Combined expression, or `None` when no filter is configured.
    pub fn combined(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .expressions
            .iter()
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" OR "))
        }
    }
}

/// Status broadcast rate limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StatusSettings {
    pub state_throttle_ms: u64,
    pub open_progress_throttle_ms: u64,
    pub periodic_enabled: bool,
    pub periodic_interval_ms: u64,
}

impl Default for StatusSettings {
    fn default() -> Self {
        StatusSettings {
            state_throttle_ms: 500,
            open_progress_throttle_ms: 100,
            periodic_enabled: true,
            periodic_interval_ms: 1_000,
        }
    }
}

/// Guard against transitions that never complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct WatchdogSettings {
    pub enabled: bool,
    pub transition_timeout_ms: u64,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        WatchdogSettings {
            enabled: true,
            transition_timeout_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = PlayerConfig::default();
        assert_eq!(cfg.buffer.max_bytes(), 30 * 1024 * 1024);
        assert_eq!(cfg.buffer.max_time_span_us, 20_000_000);
        assert_eq!(cfg.readers.max_open_files, 20);
        assert!(!cfg.readers.check_duplicate_device_names);
        assert_eq!(cfg.stepping.mode, SteppingKind::Package);
        assert_eq!(cfg.stepping.step_size_us, 100);
    }

    #[test]
    fn test_non_positive_mb_uses_default() {
        assert_eq!(mb_to_bytes(0), mb_to_bytes(DEFAULT_MAX_READ_AHEAD_MB));
        assert_eq!(mb_to_bytes(-5), mb_to_bytes(DEFAULT_MAX_READ_AHEAD_MB));
        assert_eq!(mb_to_bytes(1), 1024 * 1024);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: PlayerConfig = toml::from_str(
            r#"
            [stepping]
            mode = "cycle_id"
            cycle_id = 7
            "#,
        )
        .unwrap();
        assert_eq!(cfg.stepping.mode, SteppingKind::CycleId);
        assert_eq!(cfg.stepping.cycle_id, 7);
        assert_eq!(cfg.stepping.step_size_us, 100);
        assert_eq!(cfg.playback, PlaybackSettings::default());
    }

    #[test]
    fn test_filter_combination() {
        let f = FilterSettings {
            expressions: vec!["a == 1".into(), "  ".into(), "b".into()],
        };
        assert_eq!(f.combined().as_deref(), Some("a == 1 OR b"));
        assert_eq!(FilterSettings::default().combined(), None);
    }
}
