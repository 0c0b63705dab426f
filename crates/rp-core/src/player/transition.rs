//! Pure transition table of the player state machine.
//!
//! [`transition`] maps a state and an event to the next state plus the
//! effects to run on entry. It performs no I/O; the machine applies the
//! effects and feeds any follow-up events back in.

use rp_common::{JumpKind, PlayerState};
use std::fmt;
use std::path::PathBuf;

use super::publish_loop::StopReason;

/// Parameters of one play run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayRequest {
    /// `None` plays until another stop condition.
    pub steps: Option<u64>,
    pub until_timestamp: Option<u64>,
    /// Overrides the configured target for this run.
    pub speed_factor: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Open(Vec<PathBuf>),
    Loaded,
    OpenFailed { code: u32, message: String },
    Close,
    Unloaded,
    Jump { timestamp: u64, kind: JumpKind },
    JumpComplete,
    StepForward(PlayRequest),
    Pause,
    StepComplete { run_id: u64, reason: StopReason },
    HandledError,
    UnhandledError,
    ResetOnFault,
    Fault { code: u32, message: String },
    Shutdown,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Open(_) => "open",
            Event::Loaded => "loaded",
            Event::OpenFailed { .. } => "open_failed",
            Event::Close => "close",
            Event::Unloaded => "unloaded",
            Event::Jump { .. } => "jump",
            Event::JumpComplete => "jump_complete",
            Event::StepForward(_) => "step_forward",
            Event::Pause => "pause",
            Event::StepComplete { .. } => "step_complete",
            Event::HandledError => "handled_error",
            Event::UnhandledError => "unhandled_error",
            Event::ResetOnFault => "reset_on_fault",
            Event::Fault { .. } => "fault",
            Event::Shutdown => "shutdown",
        }
    }
}

/// Work the machine performs when entering the target state.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    OpenRecording(Vec<PathBuf>),
    AnnounceLoaded,
    ReportError { code: u32, message: String },
    UnloadRecording,
    AnnounceClosed,
    JumpTo { timestamp: u64, kind: JumpKind },
    StartPlayback(PlayRequest),
    StopPlayback,
    FinishPlayback { run_id: u64, reason: StopReason },
    ResetResources,
    Teardown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: PlayerState,
    pub to: PlayerState,
    pub effects: Vec<Effect>,
}

/// The event has no edge out of the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoTransition {
    pub state: PlayerState,
    pub event: &'static str,
}

impl fmt::Display for NoTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no transition for {} in {}", self.event, self.state)
    }
}

impl std::error::Error for NoTransition {}

fn to(from: PlayerState, to: PlayerState, effects: Vec<Effect>) -> Result<Transition, NoTransition> {
    Ok(Transition { from, to, effects })
}

pub fn transition(state: PlayerState, event: Event) -> Result<Transition, NoTransition> {
    use PlayerState as S;

    let name = event.name();
    match (state, event) {
        (S::Shutdown, _) => Err(NoTransition { state, event: name }),
        (_, Event::Shutdown) => to(state, S::Shutdown, vec![Effect::Teardown]),

        (S::New, Event::Open(paths)) => to(state, S::Opening, vec![Effect::OpenRecording(paths)]),
        (S::Opening, Event::Loaded) => to(state, S::Ready, vec![Effect::AnnounceLoaded]),
        (S::Opening, Event::OpenFailed { code, message }) => {
            to(state, S::Error, vec![Effect::ReportError { code, message }])
        }

        (S::Ready, Event::Close) => to(state, S::UnloadRecording, vec![Effect::UnloadRecording]),
        (S::UnloadRecording, Event::Unloaded) => to(state, S::New, vec![Effect::AnnounceClosed]),

        (S::Ready, Event::Jump { timestamp, kind }) => {
            to(state, S::SkipTo, vec![Effect::JumpTo { timestamp, kind }])
        }
        (S::SkipTo, Event::JumpComplete) => to(state, S::Ready, vec![]),

        (S::Ready, Event::StepForward(request)) => {
            to(state, S::Play, vec![Effect::StartPlayback(request)])
        }
        (S::Play, Event::Pause) => to(state, S::Ready, vec![Effect::StopPlayback]),
        (S::Play, Event::StepComplete { run_id, reason }) => {
            to(state, S::Ready, vec![Effect::FinishPlayback { run_id, reason }])
        }

        (S::Error, Event::HandledError) => to(state, S::New, vec![Effect::ResetResources]),
        (S::Error | S::SkipTo, Event::UnhandledError) => {
            to(state, S::Shutdown, vec![Effect::Teardown])
        }
        (S::Opening | S::SkipTo | S::UnloadRecording, Event::ResetOnFault) => {
            to(state, S::New, vec![Effect::ResetResources])
        }
        (s, Event::Fault { code, message }) if s != S::Error => {
            to(state, S::Error, vec![Effect::ReportError { code, message }])
        }

        _ => Err(NoTransition { state, event: name }),
    }
}

/// Expand a user event into the sequence the table can handle from `state`.
///
/// Opening a new recording or shutting down while one is loaded closes it
/// first; leaving playback pauses first.
pub fn expand(state: PlayerState, event: Event) -> Vec<Event> {
    use PlayerState as S;

    match (state, &event) {
        (S::Play, Event::Open(_) | Event::Shutdown | Event::Close) => {
            let mut events = vec![Event::Pause, Event::Close];
            if !matches!(event, Event::Close) {
                events.push(event);
            }
            events
        }
        (S::Play, Event::Jump { .. }) => vec![Event::Pause, event],
        (S::Ready, Event::Open(_) | Event::Shutdown) => vec![Event::Close, event],
        _ => vec![event],
    }
}
