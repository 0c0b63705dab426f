//! Recording identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned to each successfully opened recording.
///
/// Format: `rec-<date>-<time>-<random>`
/// Example: `rec-20260115-143022-abc123`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordingId(pub String);

impl RecordingId {
    /// Generate a new recording ID.
    pub fn new() -> Self {
        let now = chrono::Utc::now();
        let random: String = uuid::Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(6)
            .collect();
        RecordingId(format!("rec-{}-{}", now.format("%Y%m%d-%H%M%S"), random))
    }

    /// Parse an existing recording ID string.
    pub fn parse(s: &str) -> Option<Self> {
        if s.starts_with("rec-") && s.len() > 19 {
            Some(RecordingId(s.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RecordingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_id_format() {
        let id = RecordingId::new();
        assert!(id.0.starts_with("rec-"));
        assert_eq!(id.0.len(), "rec-20260115-143022-abc123".len());
        assert_eq!(RecordingId::parse(id.as_str()), Some(id));
    }

    #[test]
    fn test_parse_rejects_foreign() {
        assert!(RecordingId::parse("sess-20260115-143022-abc123").is_none());
        assert!(RecordingId::parse("rec-1").is_none());
    }

    #[test]
    fn test_ids_differ() {
        assert_ne!(RecordingId::new(), RecordingId::new());
    }
}
