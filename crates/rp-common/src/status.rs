//! Player state and status events broadcast to observers.

use crate::descriptions::FileStats;
use crate::schema::SCHEMA_VERSION;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Player state ────────────────────────────────────────────────────────

/// Player lifecycle state. Exactly one is current at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PlayerState {
    New = 0,
    Opening = 1,
    Ready = 2,
    Play = 3,
    SkipTo = 4,
    UnloadRecording = 5,
    Error = 6,
    Shutdown = 7,
}

impl PlayerState {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`PlayerState::as_u8`].
    pub const fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => PlayerState::New,
            1 => PlayerState::Opening,
            2 => PlayerState::Ready,
            3 => PlayerState::Play,
            4 => PlayerState::SkipTo,
            5 => PlayerState::UnloadRecording,
            6 => PlayerState::Error,
            7 => PlayerState::Shutdown,
            _ => return None,
        })
    }

    /// Upper-case wire name, e.g. `SKIP_TO`.
    pub const fn wire_name(self) -> &'static str {
        match self {
            PlayerState::New => "NEW",
            PlayerState::Opening => "OPENING",
            PlayerState::Ready => "READY",
            PlayerState::Play => "PLAY",
            PlayerState::SkipTo => "SKIP_TO",
            PlayerState::UnloadRecording => "UNLOAD_RECORDING",
            PlayerState::Error => "ERROR",
            PlayerState::Shutdown => "SHUTDOWN",
        }
    }

    /// States that run work on entry and leave on their own.
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            PlayerState::Opening
                | PlayerState::Play
                | PlayerState::SkipTo
                | PlayerState::UnloadRecording
                | PlayerState::Error
        )
    }

    pub const fn has_recording(self) -> bool {
        matches!(
            self,
            PlayerState::Ready | PlayerState::Play | PlayerState::SkipTo
        )
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayerState::New => "new",
            PlayerState::Opening => "opening",
            PlayerState::Ready => "ready",
            PlayerState::Play => "play",
            PlayerState::SkipTo => "skip_to",
            PlayerState::UnloadRecording => "unload_recording",
            PlayerState::Error => "error",
            PlayerState::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Where in a state's lifetime a state event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StatePhase {
    Enter,
    On,
    Exit,
}

impl StatePhase {
    /// Wire label combining phase and state, e.g. `ENTER_READY`.
    pub fn label(self, state: PlayerState) -> String {
        let prefix = match self {
            StatePhase::Enter => "ENTER",
            StatePhase::On => "ON",
            StatePhase::Exit => "EXIT",
        };
        format!("{prefix}_{}", state.wire_name())
    }
}

// ── Status payloads ─────────────────────────────────────────────────────

/// What one "step" means during playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SteppingKind {
    #[default]
    Package,
    CycleId,
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct SteppingInfo {
    pub kind: SteppingKind,
    /// Cycle id or step size in µs; zero for per-package stepping.
    pub value: u64,
}

/// Cumulative replay counters for the open recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ReplayCounters {
    /// Packages moved from readers into the buffer.
    pub read_packages: u64,
    pub published_packages: u64,
    pub published_bytes: u64,
    pub publish_failures: u64,
}

/// Snapshot of the player for status observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlayerStatus {
    pub state: PlayerState,
    pub phase: StatePhase,
    pub recording_name: String,
    pub min_timestamp: u64,
    pub max_timestamp: u64,
    pub current_timestamp: u64,
    pub speed_factor: f32,
    pub stepping: SteppingInfo,
    pub counters: ReplayCounters,
}

impl PlayerStatus {
    pub fn idle() -> Self {
        PlayerStatus {
            state: PlayerState::New,
            phase: StatePhase::On,
            recording_name: String::new(),
            min_timestamp: 0,
            max_timestamp: 0,
            current_timestamp: 0,
            speed_factor: 0.0,
            stepping: SteppingInfo::default(),
            counters: ReplayCounters::default(),
        }
    }

    pub fn label(&self) -> String {
        self.phase.label(self.state)
    }
}

// ── Events ──────────────────────────────────────────────────────────────

/// Event body, tagged by `event` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusKind {
    /// State entry/exit or periodic status refresh.
    State(PlayerStatus),
    OpenProgress {
        file: String,
        description: String,
        current: u32,
        total: u32,
    },
    RecordingLoaded {
        recording_id: String,
        files: Vec<String>,
        stats: FileStats,
        #[serde(default)]
        config_hash: Option<String>,
    },
    RecordingClosed {
        #[serde(default)]
        recording_id: Option<String>,
    },
    OpenFailed {
        code: u32,
        message: String,
    },
    CommandFailed {
        command: String,
        code: u32,
        message: String,
    },
    CommandIgnored {
        command: String,
        state: PlayerState,
    },
}

impl StatusKind {
    /// Whether observers should treat this event as a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StatusKind::OpenFailed { .. } | StatusKind::CommandFailed { .. }
        )
    }

    /// Error code for failure events.
    pub fn error_code(&self) -> Option<u32> {
        match self {
            StatusKind::OpenFailed { code, .. } | StatusKind::CommandFailed { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }
}

/// A timestamped, versioned status event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StatusEvent {
    pub schema_version: String,
    /// RFC 3339 wall-clock time of emission.
    pub emitted_at: String,
    #[serde(flatten)]
    pub kind: StatusKind,
}

impl StatusEvent {
    pub fn now(kind: StatusKind) -> Self {
        StatusEvent {
            schema_version: SCHEMA_VERSION.to_string(),
            emitted_at: chrono::Utc::now().to_rfc3339(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_u8_roundtrip_covers_all() {
        for raw in 0..8u8 {
            let state = PlayerState::from_u8(raw).unwrap();
            assert_eq!(state.as_u8(), raw);
        }
        assert!(PlayerState::from_u8(8).is_none());
    }

    #[test]
    fn test_phase_label() {
        assert_eq!(StatePhase::Enter.label(PlayerState::SkipTo), "ENTER_SKIP_TO");
        assert_eq!(
            StatePhase::Exit.label(PlayerState::UnloadRecording),
            "EXIT_UNLOAD_RECORDING"
        );
    }

    #[test]
    fn test_event_json_is_tagged() {
        let ev = StatusEvent::now(StatusKind::OpenFailed {
            code: 21,
            message: "nope".into(),
        });
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "open_failed");
        assert_eq!(v["code"], 21);
        assert_eq!(v["schema_version"], SCHEMA_VERSION);
        assert!(ev.kind.is_failure());
        assert_eq!(ev.kind.error_code(), Some(21));
    }

    #[test]
    fn test_state_event_flattens_status() {
        let ev = StatusEvent::now(StatusKind::State(PlayerStatus::idle()));
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "state");
        assert_eq!(v["state"], "new");
        assert!(!ev.kind.is_failure());
    }
}
