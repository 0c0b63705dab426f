//! Schema versioning and JSON Schema export for wire messages.

use crate::command::CommandEnvelope;
use crate::status::StatusEvent;

/// Version stamped on every status event and checked on config files.
///
/// Only the major component matters for compatibility; consumers must
/// ignore unknown fields within a major.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Whether `version` shares our major version.
pub fn is_compatible(version: &str) -> bool {
    major(SCHEMA_VERSION) == major(version)
}

fn major(version: &str) -> u32 {
    version
        .split('.')
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(0)
}

/// JSON Schema for control commands.
pub fn command_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(CommandEnvelope)).unwrap_or_default()
}

/// JSON Schema for status events.
pub fn status_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(StatusEvent)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_major_compatible() {
        assert!(is_compatible("1.0.0"));
        assert!(is_compatible("1.4.2"));
    }

    #[test]
    fn test_different_major_incompatible() {
        assert!(!is_compatible("0.9.0"));
        assert!(!is_compatible("2.0.0"));
        assert!(!is_compatible("garbage"));
    }

    #[test]
    fn test_schemas_are_objects() {
        assert!(command_schema().is_object());
        assert!(status_schema().is_object());
    }
}
