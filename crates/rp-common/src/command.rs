//! Playback control requests.
//!
//! Requests arrive on the control channel as JSON objects tagged by
//! `command`, for example:
//!
//! ```json
//! {"id": 7, "command": "step_forward", "steps": 10}
//! {"command": "jump", "timestamp": 1500000, "kind": "relative"}
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// How a jump timestamp is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JumpKind {
    /// Absolute simulated timestamp. `0` means recording start and
    /// `u64::MAX` means recording end.
    #[default]
    Absolute,
    /// Offset from the recording start.
    Relative,
}

impl fmt::Display for JumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JumpKind::Absolute => write!(f, "absolute"),
            JumpKind::Relative => write!(f, "relative"),
        }
    }
}

/// A single control command. Consumed exactly once by the player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum PlaybackRequest {
    Open {
        paths: Vec<PathBuf>,
    },
    Close,
    StepForward {
        /// Number of steps; absent means unlimited.
        #[serde(default)]
        steps: Option<u64>,
        /// Stop once a package at or beyond this timestamp has been delivered.
        #[serde(default)]
        until_timestamp: Option<u64>,
        /// Pacing target for this run only.
        #[serde(default)]
        speed_factor: Option<f32>,
    },
    Pause,
    Jump {
        timestamp: u64,
        #[serde(default)]
        kind: JumpKind,
    },
    Shutdown,
}

impl PlaybackRequest {
    pub fn open<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        PlaybackRequest::Open {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Step forward a fixed number of steps.
    pub fn step(steps: u64) -> Self {
        PlaybackRequest::StepForward {
            steps: Some(steps),
            until_timestamp: None,
            speed_factor: None,
        }
    }

    /// Play until the end of the recording.
    pub fn play() -> Self {
        PlaybackRequest::StepForward {
            steps: None,
            until_timestamp: None,
            speed_factor: None,
        }
    }

    pub fn step_until(until_timestamp: u64) -> Self {
        PlaybackRequest::StepForward {
            steps: None,
            until_timestamp: Some(until_timestamp),
            speed_factor: None,
        }
    }

    pub fn jump(timestamp: u64, kind: JumpKind) -> Self {
        PlaybackRequest::Jump { timestamp, kind }
    }

    /// Short command name for logs and status events.
    pub fn name(&self) -> &'static str {
        match self {
            PlaybackRequest::Open { .. } => "open",
            PlaybackRequest::Close => "close",
            PlaybackRequest::StepForward { .. } => "step_forward",
            PlaybackRequest::Pause => "pause",
            PlaybackRequest::Jump { .. } => "jump",
            PlaybackRequest::Shutdown => "shutdown",
        }
    }
}

/// A request plus the caller-chosen correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CommandEnvelope {
    #[serde(default)]
    pub id: u64,
    #[serde(flatten)]
    pub request: PlaybackRequest,
}

impl CommandEnvelope {
    /// Parse one JSON command line.
    pub fn parse(line: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_step_forward_defaults() {
        let env = CommandEnvelope::parse(r#"{"command":"step_forward","steps":3}"#).unwrap();
        assert_eq!(env.id, 0);
        assert_eq!(env.request, PlaybackRequest::step(3));
    }

    #[test]
    fn test_parse_unit_commands() {
        for (line, expected) in [
            (r#"{"command":"close"}"#, PlaybackRequest::Close),
            (r#"{"command":"pause"}"#, PlaybackRequest::Pause),
            (r#"{"command":"shutdown"}"#, PlaybackRequest::Shutdown),
        ] {
            assert_eq!(CommandEnvelope::parse(line).unwrap().request, expected);
        }
    }

    #[test]
    fn test_parse_jump_kind() {
        let env =
            CommandEnvelope::parse(r#"{"id":4,"command":"jump","timestamp":10,"kind":"relative"}"#)
                .unwrap();
        assert_eq!(env.id, 4);
        assert_eq!(env.request, PlaybackRequest::jump(10, JumpKind::Relative));

        let env = CommandEnvelope::parse(r#"{"command":"jump","timestamp":10}"#).unwrap();
        assert_eq!(env.request, PlaybackRequest::jump(10, JumpKind::Absolute));
    }

    #[test]
    fn test_parse_open_paths() {
        let env = CommandEnvelope::parse(r#"{"command":"open","paths":["a.rpscn","b.rpscn"]}"#)
            .unwrap();
        assert_eq!(env.request, PlaybackRequest::open(["a.rpscn", "b.rpscn"]));
        assert_eq!(env.request.name(), "open");
    }

    #[test]
    fn test_unknown_command_rejected() {
        let err = CommandEnvelope::parse(r#"{"command":"rewind"}"#).unwrap_err();
        assert_eq!(err.code(), 61);
    }
}
