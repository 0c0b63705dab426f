//! Error types for recplay.

use thiserror::Error;

/// Result type alias for recplay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for recplay.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Open errors (20-29)
    #[error("no recording files given")]
    NoFiles,

    #[error("unsupported recording file: {path}")]
    UnsupportedFile { path: String },

    #[error("reader failed to open {path}: {reason}")]
    ReaderOpen { path: String, reason: String },

    #[error("too many recording files: {requested} requested, at most {max} allowed")]
    TooManyFiles { requested: usize, max: usize },

    #[error("device name {device} reported by more than one reader")]
    DuplicateDevice { device: String },

    // Playback errors (30-39)
    #[error("reader failure: {0}")]
    Reader(String),

    #[error("jump to {timestamp} failed: {reason}")]
    JumpFailed { timestamp: u64, reason: String },

    #[error("transition from {state} timed out after {millis}ms")]
    TransitionTimeout { state: String, millis: u64 },

    #[error("transition failed in {state}: {reason}")]
    TransitionFailed { state: String, reason: String },

    // Control errors (40-49)
    #[error("player has shut down")]
    ShutDown,

    #[error("command channel closed")]
    ChannelClosed,

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    /// Carried in failure status events and JSON output.
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidConfig(_) => 11,
            Error::NoFiles => 20,
            Error::UnsupportedFile { .. } => 21,
            Error::ReaderOpen { .. } => 22,
            Error::TooManyFiles { .. } => 23,
            Error::DuplicateDevice { .. } => 24,
            Error::Reader(_) => 30,
            Error::JumpFailed { .. } => 31,
            Error::TransitionTimeout { .. } => 32,
            Error::TransitionFailed { .. } => 33,
            Error::ShutDown => 40,
            Error::ChannelClosed => 41,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }

    /// Open-phase failures end in `Error` then `New`, not `Shutdown`.
    pub fn is_open_failure(&self) -> bool {
        (20..30).contains(&self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_grouped_by_area() {
        assert_eq!(Error::Config("x".into()).code(), 10);
        assert_eq!(Error::NoFiles.code(), 20);
        assert_eq!(
            Error::TooManyFiles {
                requested: 21,
                max: 20
            }
            .code(),
            23
        );
        assert_eq!(Error::ShutDown.code(), 40);
    }

    #[test]
    fn test_open_failure_classification() {
        assert!(Error::DuplicateDevice {
            device: "cam".into()
        }
        .is_open_failure());
        assert!(!Error::Reader("eof".into()).is_open_failure());
    }

    #[test]
    fn test_display_mentions_limits() {
        let msg = Error::TooManyFiles {
            requested: 21,
            max: 20,
        }
        .to_string();
        assert!(msg.contains("21"));
        assert!(msg.contains("20"));
    }
}
