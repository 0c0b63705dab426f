//! Semantic validation of a parsed configuration.

use rp_common::SteppingKind;
use serde::Serialize;

use crate::player::PlayerConfig;

/// Hard upper bound on simultaneously open recording files.
pub const MAX_OPEN_FILES_LIMIT: usize = 256;

/// One problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    /// Dotted key of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        ValidationError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Errors block startup; warnings are logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check cross-field and range constraints serde cannot express.
pub fn validate(config: &PlayerConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if !rp_common::schema::is_compatible(&config.schema_version) {
        result.errors.push(ValidationError::new(
            "schema_version",
            format!("unsupported schema version {}", config.schema_version),
        ));
    }

    if config.buffer.max_read_ahead_mb <= 0 {
        result.warnings.push(ValidationError::new(
            "buffer.max_read_ahead_mb",
            "non-positive value, the default budget is used",
        ));
    }
    if config.buffer.max_time_span_us == 0 {
        result.errors.push(ValidationError::new(
            "buffer.max_time_span_us",
            "must be greater than zero",
        ));
    }

    if config.stepping.mode == SteppingKind::Timestamp && config.stepping.step_size_us == 0 {
        result.warnings.push(ValidationError::new(
            "stepping.step_size_us",
            "zero step size, stepping falls back to one package per step",
        ));
    }

    let playback = &config.playback;
    if !playback.realtime_factor.is_finite() {
        result.errors.push(ValidationError::new(
            "playback.realtime_factor",
            "must be a finite number",
        ));
    } else if playback.realtime_factor <= 0.0 {
        result.warnings.push(ValidationError::new(
            "playback.realtime_factor",
            "pacing disabled, packages are published as fast as possible",
        ));
    }
    if playback.check_period_ms == 0 {
        result.errors.push(ValidationError::new(
            "playback.check_period_ms",
            "must be greater than zero",
        ));
    }
    if playback.report_interval_ms < playback.check_period_ms {
        result.warnings.push(ValidationError::new(
            "playback.report_interval_ms",
            "shorter than the check period, reports follow the check period",
        ));
    }

    if config.readers.max_open_files == 0 {
        result.errors.push(ValidationError::new(
            "readers.max_open_files",
            "must allow at least one file",
        ));
    } else if config.readers.max_open_files > MAX_OPEN_FILES_LIMIT {
        result.errors.push(ValidationError::new(
            "readers.max_open_files",
            format!("must not exceed {MAX_OPEN_FILES_LIMIT}"),
        ));
    }

    if config.watchdog.enabled && config.watchdog.transition_timeout_ms == 0 {
        result.errors.push(ValidationError::new(
            "watchdog.transition_timeout_ms",
            "must be greater than zero while the watchdog is enabled",
        ));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let result = validate(&PlayerConfig::default());
        assert!(result.is_ok(), "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_disabled_pacing_is_warning() {
        let mut cfg = PlayerConfig::default();
        cfg.playback.realtime_factor = 0.0;
        let result = validate(&cfg);
        assert!(result.is_ok());
        assert_eq!(result.warnings[0].field, "playback.realtime_factor");
    }

    #[test]
    fn test_errors_collected() {
        let mut cfg = PlayerConfig::default();
        cfg.readers.max_open_files = 0;
        cfg.buffer.max_time_span_us = 0;
        cfg.playback.realtime_factor = f64::NAN;
        let result = validate(&cfg);
        let fields: Vec<_> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"readers.max_open_files"));
        assert!(fields.contains(&"buffer.max_time_span_us"));
        assert!(fields.contains(&"playback.realtime_factor"));
    }

    #[test]
    fn test_schema_major_mismatch() {
        let cfg = PlayerConfig {
            schema_version: "2.0.0".into(),
            ..Default::default()
        };
        assert!(!validate(&cfg).is_ok());
    }
}
