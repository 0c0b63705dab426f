//! Playback control.
//!
//! A single command thread owns the [`PlayerMachine`]. Callers talk to it
//! through a [`PlayerHandle`]; every request, internal completion and
//! speed change travels over one channel, so transitions never overlap.

pub mod context;
pub mod machine;
pub mod publish_loop;
pub mod read_ahead;
pub mod stepping;
pub mod transition;
pub mod watchdog;

use crossbeam_channel::Sender;
use rp_common::{JumpKind, PlaybackRequest, PlayerState, PlayerStatus, ReplayCounters, StatePhase};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::buffer::BufferQueue;
use crate::publish::ReplayStatistics;
use crate::status::StatusBoard;

pub use context::PlayerContext;
pub use machine::PlayerMachine;
pub use publish_loop::{PlayControl, PublishLoop, StopReason};
pub use stepping::{StepBudget, Stepper, SteppingMode};
pub use transition::{Effect, Event, NoTransition, PlayRequest, Transition};
pub use watchdog::Watchdog;

/// Messages consumed by the command thread.
#[derive(Debug)]
pub enum Command {
    Request {
        request: PlaybackRequest,
        /// Receives the state reached once the request has been handled.
        ack: Option<Sender<PlayerState>>,
    },
    /// A play run ended on its own.
    StepComplete { run_id: u64, reason: StopReason },
    SetSpeedFactor(f64),
}

pub struct Player;

impl Player {
    /// Build the pipeline and start the command thread.
    pub fn spawn(ctx: PlayerContext) -> rp_common::Result<PlayerHandle> {
        let board = Arc::new(StatusBoard::new(Arc::new(ReplayStatistics::new())));
        let (commands, rx) = crossbeam_channel::unbounded();
        let machine = PlayerMachine::new(ctx, Arc::clone(&board), commands.clone())?;
        let buffer = Arc::clone(machine.buffer());

        let thread = thread::Builder::new()
            .name("recplay-player".into())
            .spawn(move || {
                let mut machine = machine;
                while let Ok(command) = rx.recv() {
                    match command {
                        Command::Request { request, ack } => {
                            debug!(command = request.name(), "command received");
                            let state = machine.handle_request(request);
                            if let Some(ack) = ack {
                                let _ = ack.send(state);
                            }
                        }
                        Command::StepComplete { run_id, reason } => {
                            machine.dispatch(Event::StepComplete { run_id, reason });
                        }
                        Command::SetSpeedFactor(factor) => machine.set_speed_factor(factor),
                    }
                    if machine.state() == PlayerState::Shutdown {
                        break;
                    }
                }
                drop(machine);
                for command in rx.try_iter() {
                    if let Command::Request { ack: Some(ack), .. } = command {
                        let _ = ack.send(PlayerState::Shutdown);
                    }
                }
                info!("command thread exited");
            })?;

        Ok(PlayerHandle {
            commands,
            board,
            buffer,
            thread: Some(thread),
        })
    }
}

/// Caller side of a running player.
pub struct PlayerHandle {
    commands: Sender<Command>,
    board: Arc<StatusBoard>,
    buffer: Arc<BufferQueue>,
    thread: Option<JoinHandle<()>>,
}

impl PlayerHandle {
    /// Queue a request without waiting for it.
    pub fn submit(&self, request: PlaybackRequest) -> rp_common::Result<()> {
        self.commands
            .send(Command::Request { request, ack: None })
            .map_err(|_| rp_common::Error::ChannelClosed)
    }

    /// Queue a request and wait until the command thread has handled it.
    pub fn execute(&self, request: PlaybackRequest) -> rp_common::Result<PlayerState> {
        let (ack, done) = crossbeam_channel::bounded(1);
        self.commands
            .send(Command::Request {
                request,
                ack: Some(ack),
            })
            .map_err(|_| rp_common::Error::ShutDown)?;
        done.recv().map_err(|_| rp_common::Error::ShutDown)
    }

    pub fn open<I, P>(&self, paths: I) -> rp_common::Result<PlayerState>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.execute(PlaybackRequest::open(paths))
    }

    pub fn close(&self) -> rp_common::Result<PlayerState> {
        self.execute(PlaybackRequest::Close)
    }

    pub fn step_forward(&self, steps: u64) -> rp_common::Result<PlayerState> {
        self.execute(PlaybackRequest::step(steps))
    }

    pub fn play(&self) -> rp_common::Result<PlayerState> {
        self.execute(PlaybackRequest::play())
    }

    pub fn play_until(&self, timestamp: u64) -> rp_common::Result<PlayerState> {
        self.execute(PlaybackRequest::step_until(timestamp))
    }

    pub fn pause(&self) -> rp_common::Result<PlayerState> {
        self.execute(PlaybackRequest::Pause)
    }

    pub fn jump(&self, timestamp: u64, kind: JumpKind) -> rp_common::Result<PlayerState> {
        self.execute(PlaybackRequest::jump(timestamp, kind))
    }

    pub fn set_speed_factor(&self, factor: f64) -> rp_common::Result<()> {
        self.commands
            .send(Command::SetSpeedFactor(factor))
            .map_err(|_| rp_common::Error::ChannelClosed)
    }

    /// Shut the player down and wait for the command thread.
    pub fn shutdown(&mut self) -> rp_common::Result<PlayerState> {
        let Some(thread) = self.thread.take() else {
            return Ok(PlayerState::Shutdown);
        };
        let state = self.execute(PlaybackRequest::Shutdown);
        if thread.join().is_err() {
            warn!("command thread panicked");
        }
        state
    }

    pub fn state(&self) -> PlayerState {
        self.board.state()
    }

    pub fn status(&self) -> PlayerStatus {
        self.board.snapshot(StatePhase::On)
    }

    /// Block until `state` is reached. Returns false on timeout.
    pub fn wait_for_state(&self, state: PlayerState, timeout: Duration) -> bool {
        self.board.wait_for(|s| s == state, timeout).1
    }

    /// Block until the player is neither playing nor in a transient state.
    pub fn wait_until_settled(&self, timeout: Duration) -> Option<PlayerState> {
        let (state, reached) = self.board.wait_for(|s| !s.is_transient(), timeout);
        reached.then_some(state)
    }

    pub fn last_stop(&self) -> Option<StopReason> {
        self.board.last_stop()
    }

    pub fn last_error(&self) -> Option<(u32, String)> {
        self.board.last_error()
    }

    /// Packages currently waiting in the read-ahead buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn counters(&self) -> ReplayCounters {
        self.board.statistics().counters()
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.shutdown();
        }
    }
}

impl std::fmt::Debug for PlayerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerHandle")
            .field("state", &self.board.state())
            .field("running", &self.thread.is_some())
            .finish()
    }
}
