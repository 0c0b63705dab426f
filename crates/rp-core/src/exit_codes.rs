//! Exit codes for the recplay CLI.
//!
//! Exit codes communicate the outcome of a command-line run without
//! requiring output parsing. Values are stable.

use crate::player::StopReason;

/// Exit codes for recplay operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Clean run / recording played to the end
    Clean = 0,

    /// Playback stopped before the end of the recording
    Stopped = 1,

    /// Configuration error
    ConfigError = 10,

    /// Recording could not be opened
    OpenError = 11,

    /// Playback or transition failure
    PlaybackError = 12,

    /// I/O error
    IoError = 13,

    /// Internal/unknown error
    InternalError = 99,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Check if this exit code indicates success.
    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Clean | ExitCode::Stopped)
    }

    /// Check if this exit code indicates an error requiring attention.
    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }

    /// Map a unified error code onto a process exit code.
    pub fn from_error_code(code: u32) -> Self {
        match code {
            10..=19 => ExitCode::ConfigError,
            20..=29 => ExitCode::OpenError,
            30..=49 => ExitCode::PlaybackError,
            60..=69 => ExitCode::IoError,
            _ => ExitCode::InternalError,
        }
    }

    pub fn from_error(err: &rp_common::Error) -> Self {
        ExitCode::from_error_code(err.code())
    }

    /// Exit code for a play run that ended without error.
    pub fn from_stop(reason: StopReason) -> Self {
        match reason {
            StopReason::EndOfFile => ExitCode::Clean,
            _ => ExitCode::Stopped,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.as_i32() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            ExitCode::from_error(&rp_common::Error::Config("bad".into())),
            ExitCode::ConfigError
        );
        assert_eq!(ExitCode::from_error(&rp_common::Error::NoFiles), ExitCode::OpenError);
        assert_eq!(
            ExitCode::from_error(&rp_common::Error::TransitionTimeout {
                state: "PLAY".into(),
                millis: 10
            }),
            ExitCode::PlaybackError
        );
        assert_eq!(ExitCode::from_error_code(7), ExitCode::InternalError);
    }

    #[test]
    fn test_success_classes() {
        assert!(ExitCode::from_stop(StopReason::EndOfFile).is_success());
        assert_eq!(ExitCode::from_stop(StopReason::StepsExhausted), ExitCode::Stopped);
        assert!(ExitCode::OpenError.is_error());
        assert!(!ExitCode::Stopped.is_error());
    }
}
