//! The player state machine: applies the transition table and owns the
//! pipeline it drives.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use rp_common::{
    Error, FileStats, JumpKind, PlaybackRequest, PlayerState, RecordingId, StatePhase, StatusKind,
};
use rp_config::keys;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::context::PlayerContext;
use super::publish_loop::{PlayControl, PublishLoop, StopReason};
use super::read_ahead::ReadAhead;
use super::stepping::{StepBudget, Stepper, SteppingMode};
use super::transition::{expand, transition, Effect, Event, PlayRequest};
use super::watchdog::Watchdog;
use super::Command;
use crate::buffer::BufferQueue;
use crate::pacing::{is_valid_factor, SpeedFactor};
use crate::publish::ReplayStatistics;
use crate::reader::ReaderSynchronizer;
use crate::status::{RateGate, ReporterSettings, StatusBoard, StatusReporter};

/// How often a waiting stop checks for watchdog escalation.
const STOP_POLL: Duration = Duration::from_millis(20);

struct PlaybackRun {
    run_id: u64,
    control: Arc<PlayControl>,
    done: Receiver<StopReason>,
    handle: JoinHandle<()>,
}

pub struct PlayerMachine {
    state: PlayerState,
    ctx: PlayerContext,
    sync: Arc<Mutex<ReaderSynchronizer>>,
    buffer: Arc<BufferQueue>,
    speed: Arc<SpeedFactor>,
    stats: Arc<ReplayStatistics>,
    board: Arc<StatusBoard>,
    reporter: StatusReporter,
    read_ahead: ReadAhead,
    watchdog: Watchdog,
    /// Control of the running play loop, reachable from the watchdog.
    active_control: Arc<Mutex<Option<Arc<PlayControl>>>>,
    playback: Option<PlaybackRun>,
    next_run_id: u64,
    commands: Sender<Command>,
}

impl PlayerMachine {
    pub fn new(
        ctx: PlayerContext,
        board: Arc<StatusBoard>,
        commands: Sender<Command>,
    ) -> rp_common::Result<Self> {
        let config = ctx.config.as_ref();
        let stats = Arc::clone(board.statistics());
        let sync = Arc::new(Mutex::new(ReaderSynchronizer::new(
            Arc::clone(&ctx.config),
            Arc::clone(&ctx.registry),
        )));
        let buffer = Arc::new(BufferQueue::from_config(Arc::clone(&ctx.config)));
        let speed = Arc::new(SpeedFactor::from_config(config, Arc::clone(&ctx.clock)));
        let reporter = StatusReporter::spawn(
            Arc::clone(&ctx.status_sink),
            Arc::clone(&board),
            ReporterSettings::from_config(config),
        )?;
        let read_ahead = ReadAhead::new(Arc::clone(&sync), Arc::clone(&buffer), Arc::clone(&stats));
        let active_control: Arc<Mutex<Option<Arc<PlayControl>>>> = Arc::default();

        let watchdog = if config.get_bool(keys::WATCHDOG_ENABLED, true) {
            let timeout =
                Duration::from_millis(config.get_uint(keys::TRANSITION_TIMEOUT_MS, 10_000));
            let force_buffer = Arc::clone(&buffer);
            let force_control = Arc::clone(&active_control);
            let escalate_buffer = Arc::clone(&buffer);
            Watchdog::spawn(
                timeout,
                Box::new(move || {
                    if let Some(control) = force_control.lock().as_ref() {
                        control.request_stop(StopReason::Cancelled);
                    }
                    force_buffer.pause();
                    force_buffer.stop_push();
                }),
                Box::new(move || escalate_buffer.shutdown()),
            )?
        } else {
            Watchdog::disabled()
        };

        board.set_stepping(SteppingMode::from_config(config).info());
        let machine = PlayerMachine {
            state: PlayerState::New,
            ctx,
            sync,
            buffer,
            speed,
            stats,
            board,
            reporter,
            read_ahead,
            watchdog,
            active_control,
            playback: None,
            next_run_id: 0,
            commands,
        };
        machine.board.set_state(PlayerState::New);
        machine
            .reporter
            .report_state(machine.board.snapshot(StatePhase::Enter));
        Ok(machine)
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn buffer(&self) -> &Arc<BufferQueue> {
        &self.buffer
    }

    /// Dispatch a control request. Requests arriving during playback are
    /// guarded by the watchdog.
    pub fn handle_request(&mut self, request: PlaybackRequest) -> PlayerState {
        let guarded = self.state == PlayerState::Play;
        if guarded {
            self.watchdog.arm();
        }
        let state = self.dispatch(event_for(request));
        if guarded {
            self.watchdog.disarm();
        }
        state
    }

    /// Change the pacing target for this and later runs.
    pub fn set_speed_factor(&mut self, factor: f64) {
        if !is_valid_factor(factor) {
            warn!(factor, "ignoring invalid speed factor");
            return;
        }
        if let Err(err) = self
            .ctx
            .config
            .put(keys::REALTIME_FACTOR, serde_json::json!(factor))
        {
            warn!(error = %err, "speed factor not persisted to config");
        }
        self.speed.set_factor(factor);
        info!(factor, "speed factor updated");
    }

    /// Feed one event through the table, running effects and follow-ups
    /// until the queue is empty. Returns the resulting state.
    pub fn dispatch(&mut self, event: Event) -> PlayerState {
        let mut queue: VecDeque<(Event, bool)> = expand(self.state, event)
            .into_iter()
            .map(|e| (e, false))
            .collect();

        while let Some((event, recovering)) = queue.pop_front() {
            if let Event::StepComplete { run_id, .. } = &event {
                if self.playback.as_ref().map(|r| r.run_id) != Some(*run_id) {
                    debug!(run_id, "dropping stale step completion");
                    continue;
                }
            }

            let event_name = event.name();
            let t = match transition(self.state, event) {
                Ok(t) => t,
                Err(rejected) => {
                    warn!(state = %rejected.state, event = rejected.event, "event ignored");
                    self.reporter.report(StatusKind::CommandIgnored {
                        command: rejected.event.to_string(),
                        state: rejected.state,
                    });
                    continue;
                }
            };
            self.enter(t.to);
            info!(from = %t.from, to = %t.to, event = event_name, "state transition");

            let mut follow_ups = Vec::new();
            for effect in t.effects {
                match self.apply(effect) {
                    Ok(Some(next)) => follow_ups.push((next, recovering)),
                    Ok(None) => {}
                    Err(err) => {
                        let (code, message) = (err.code(), err.to_string());
                        error!(state = %self.state, code, error = %message, "transition failed");
                        self.board.set_last_error(code, message.clone());
                        self.reporter.report(StatusKind::CommandFailed {
                            command: event_name.to_string(),
                            code,
                            message: message.clone(),
                        });
                        follow_ups = if recovering {
                            vec![(Event::Fault { code, message }, true)]
                        } else {
                            recovery_for(self.state, &err)
                                .into_iter()
                                .map(|e| (e, true))
                                .collect()
                        };
                        break;
                    }
                }
            }
            for next in follow_ups.into_iter().rev() {
                queue.push_front(next);
            }
        }
        self.state
    }

    fn enter(&mut self, state: PlayerState) {
        self.state = state;
        self.board.set_state(state);
        self.reporter
            .report_state(self.board.snapshot(StatePhase::Enter));
    }

    fn apply(&mut self, effect: Effect) -> rp_common::Result<Option<Event>> {
        match effect {
            Effect::OpenRecording(paths) => self.open_recording(paths),
            Effect::AnnounceLoaded => {
                self.announce_loaded();
                Ok(None)
            }
            Effect::ReportError { code, message } => {
                error!(code, error = %message, "player error");
                self.board.set_last_error(code, message);
                Ok(Some(Event::HandledError))
            }
            Effect::UnloadRecording => {
                self.release_recording();
                Ok(Some(Event::Unloaded))
            }
            Effect::AnnounceClosed => {
                self.announce_closed();
                Ok(None)
            }
            Effect::JumpTo { timestamp, kind } => self.jump(timestamp, kind),
            Effect::StartPlayback(request) => {
                self.start_playback(request)?;
                Ok(None)
            }
            Effect::StopPlayback => {
                self.stop_playback()?;
                Ok(None)
            }
            Effect::FinishPlayback { run_id, reason } => {
                if let Some(run) = self.playback.take() {
                    join_run(run.handle);
                }
                self.active_control.lock().take();
                info!(run_id, %reason, "playback finished");
                Ok(None)
            }
            Effect::ResetResources => {
                self.abort_playback();
                self.release_recording();
                self.announce_closed_if_loaded();
                Ok(None)
            }
            Effect::Teardown => {
                self.abort_playback();
                self.release_recording();
                self.announce_closed_if_loaded();
                self.buffer.shutdown();
                info!("player shut down");
                Ok(None)
            }
        }
    }

    // ── Effects ─────────────────────────────────────────────────────────

    fn open_recording(&mut self, paths: Vec<PathBuf>) -> rp_common::Result<Option<Event>> {
        let paths = if paths.is_empty() {
            self.ctx
                .config
                .get_string_list(keys::RECORDING_PATHS)
                .into_iter()
                .map(PathBuf::from)
                .collect()
        } else {
            paths
        };

        self.release_recording();
        let mut gate = RateGate::new(Duration::from_millis(
            self.ctx.config.get_uint(keys::OPEN_PROGRESS_THROTTLE_MS, 100),
        ));
        let reporter = &self.reporter;
        let result = self
            .sync
            .lock()
            .open_with_progress(&paths, |current, total, path| {
                if gate.allow(current == total) {
                    reporter.report(StatusKind::OpenProgress {
                        file: path.display().to_string(),
                        description: format!("opening file {current} of {total}"),
                        current,
                        total,
                    });
                }
            });

        if let Err(err) = result {
            let err = Error::from(err);
            let (code, message) = (err.code(), err.to_string());
            error!(code, error = %message, "failed to open recording");
            self.board.set_last_error(code, message.clone());
            self.reporter.report(StatusKind::OpenFailed {
                code,
                message: message.clone(),
            });
            return Ok(Some(Event::OpenFailed { code, message }));
        }

        let (stats, files) = {
            let sync = self.sync.lock();
            (sync.file_stats(), sync.paths())
        };
        let id = RecordingId::new();
        info!(recording = %id, files = files.len(), "recording opened");
        self.board
            .set_recording(id, recording_name(&files), stats);
        self.stats
            .set_current_timestamp(if stats.is_valid() { stats.start_timestamp } else { 0 });
        self.buffer.clear();
        self.buffer.resume();
        self.buffer.start_push();
        self.read_ahead.start()?;
        Ok(Some(Event::Loaded))
    }

    fn announce_loaded(&self) {
        let (stats, files) = {
            let sync = self.sync.lock();
            (sync.file_stats(), sync.paths())
        };
        self.reporter.report(StatusKind::RecordingLoaded {
            recording_id: self
                .board
                .recording_id()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            files: files.iter().map(|p| p.display().to_string()).collect(),
            stats,
            config_hash: self.ctx.snapshot.as_ref().map(|s| s.config_hash.clone()),
        });
    }

    fn announce_closed(&self) {
        let recording_id = self.board.clear_recording().map(|id| id.to_string());
        info!(recording = ?recording_id, "recording closed");
        self.reporter
            .report(StatusKind::RecordingClosed { recording_id });
    }

    fn announce_closed_if_loaded(&self) {
        if self.board.recording_id().is_some() {
            self.announce_closed();
        }
    }

    /// Stop read-ahead and drop the recording and everything buffered.
    fn release_recording(&mut self) {
        self.read_ahead.stop();
        self.buffer.stop_push();
        self.buffer.clear();
        self.sync.lock().reset();
        self.stats.reset();
        self.speed.reset();
    }

    fn jump(&mut self, timestamp: u64, kind: JumpKind) -> rp_common::Result<Option<Event>> {
        let stats = self.sync.lock().file_stats();
        let target = resolve_jump(stats, timestamp, kind);
        debug!(timestamp, %kind, target, "jumping");

        self.buffer.stop_push();
        self.read_ahead.stop();
        self.buffer.clear();
        self.sync
            .lock()
            .jump_to(target)
            .map_err(|err| Error::JumpFailed {
                timestamp: target,
                reason: err.to_string(),
            })?;
        self.speed.reset();
        self.stats.set_current_timestamp(stats.clamp(target));
        self.buffer.start_push();
        self.read_ahead.start()?;
        Ok(Some(Event::JumpComplete))
    }

    fn start_playback(&mut self, request: PlayRequest) -> rp_common::Result<()> {
        self.next_run_id += 1;
        let run_id = self.next_run_id;
        let config = self.ctx.config.as_ref();

        let configured = config.get_float(keys::REALTIME_FACTOR, 10.0);
        let target = match request.speed_factor.map(f64::from) {
            Some(requested) if is_valid_factor(requested) => requested,
            Some(requested) => {
                warn!(requested, configured, "invalid speed factor in request, using configured");
                configured
            }
            None => configured,
        };
        if !self.speed.set_factor(target) {
            // Unusable configured value as well: run unpaced.
            self.speed.set_factor(0.0);
        }
        self.speed.reset();
        let mode = SteppingMode::from_config(config);
        self.board.set_stepping(mode.info());

        let control = Arc::new(PlayControl::new());
        *self.active_control.lock() = Some(Arc::clone(&control));
        self.buffer.resume();

        let (done_tx, done) = crossbeam_channel::bounded(1);
        let handle = {
            let control = Arc::clone(&control);
            let buffer = Arc::clone(&self.buffer);
            let speed = Arc::clone(&self.speed);
            let stats = Arc::clone(&self.stats);
            let bus = Arc::clone(&self.ctx.bus);
            let orchestrator = Arc::clone(&self.ctx.orchestrator);
            let mut completion = RunCompletion {
                run_id,
                board: Arc::clone(&self.board),
                done: done_tx,
                commands: self.commands.clone(),
                reason: StopReason::Cancelled,
            };
            thread::Builder::new()
                .name("recplay-publish".into())
                .spawn(move || {
                    completion.reason = PublishLoop {
                        buffer: &buffer,
                        speed: &speed,
                        stats: &stats,
                        bus: bus.as_ref(),
                        orchestrator: orchestrator.as_ref(),
                        control: &control,
                        stepper: Stepper::new(mode),
                        budget: StepBudget::from_request(request.steps),
                        until_timestamp: request.until_timestamp,
                    }
                    .run();
                })?
        };

        info!(
            run_id,
            steps = ?request.steps,
            until = ?request.until_timestamp,
            speed = target,
            "playback started"
        );
        self.playback = Some(PlaybackRun {
            run_id,
            control,
            done,
            handle,
        });
        Ok(())
    }

    fn stop_playback(&mut self) -> rp_common::Result<()> {
        let Some(run) = self.playback.take() else {
            return Ok(());
        };
        run.control.request_stop(StopReason::Paused);
        self.buffer.pause();
        let reason = self.wait_for_run(run)?;
        self.active_control.lock().take();
        if self.watchdog.forced() {
            warn!("playback stop was forced by the watchdog");
            self.buffer.start_push();
        }
        info!(%reason, "playback stopped");
        Ok(())
    }

    /// Best-effort stop used while tearing down.
    fn abort_playback(&mut self) {
        if let Some(run) = self.playback.take() {
            run.control.request_stop(StopReason::Cancelled);
            self.buffer.pause();
            if let Err(err) = self.wait_for_run(run) {
                warn!(error = %err, "abandoning stuck publish loop");
            }
        }
        self.active_control.lock().take();
    }

    fn wait_for_run(&self, run: PlaybackRun) -> rp_common::Result<StopReason> {
        loop {
            match run.done.recv_timeout(STOP_POLL) {
                Ok(reason) => {
                    join_run(run.handle);
                    return Ok(reason);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    join_run(run.handle);
                    return Ok(StopReason::Cancelled);
                }
                Err(RecvTimeoutError::Timeout) if self.watchdog.escalated() => {
                    return Err(Error::TransitionTimeout {
                        state: PlayerState::Play.to_string(),
                        millis: self.watchdog.timeout().as_millis() as u64,
                    });
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }
}

impl Drop for PlayerMachine {
    fn drop(&mut self) {
        if self.state != PlayerState::Shutdown {
            self.dispatch(Event::Shutdown);
        }
        self.reporter.stop();
    }
}

/// Reports the end of a play run when the publish thread finishes, also
/// when it unwinds, so the machine never stays in Play.
struct RunCompletion {
    run_id: u64,
    board: Arc<StatusBoard>,
    done: Sender<StopReason>,
    commands: Sender<Command>,
    /// Stays `Cancelled` unless the loop returns normally.
    reason: StopReason,
}

impl Drop for RunCompletion {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(run_id = self.run_id, "publish loop panicked, ending run");
        }
        self.board.set_last_stop(self.reason);
        let _ = self.done.send(self.reason);
        let _ = self.commands.send(Command::StepComplete {
            run_id: self.run_id,
            reason: self.reason,
        });
    }
}

fn join_run(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        warn!("publish loop panicked");
    }
}

/// Follow-up events after an effect failed while in `state`.
fn recovery_for(state: PlayerState, err: &Error) -> Vec<Event> {
    if matches!(err, Error::TransitionTimeout { .. }) {
        return vec![Event::Shutdown];
    }
    match state {
        PlayerState::Ready => vec![Event::Close],
        PlayerState::Play => vec![Event::Pause, Event::Close],
        PlayerState::Opening | PlayerState::SkipTo | PlayerState::UnloadRecording => {
            vec![Event::ResetOnFault]
        }
        PlayerState::Error => vec![Event::UnhandledError],
        PlayerState::New | PlayerState::Shutdown => Vec::new(),
    }
}

/// Translate a control request into a machine event.
pub fn event_for(request: PlaybackRequest) -> Event {
    match request {
        PlaybackRequest::Open { paths } => Event::Open(paths),
        PlaybackRequest::Close => Event::Close,
        PlaybackRequest::StepForward {
            steps,
            until_timestamp,
            speed_factor,
        } => Event::StepForward(PlayRequest {
            steps,
            until_timestamp,
            speed_factor,
        }),
        PlaybackRequest::Pause => Event::Pause,
        PlaybackRequest::Jump { timestamp, kind } => Event::Jump { timestamp, kind },
        PlaybackRequest::Shutdown => Event::Shutdown,
    }
}

/// Absolute target for a jump request.
pub fn resolve_jump(stats: FileStats, timestamp: u64, kind: JumpKind) -> u64 {
    let start = if stats.is_valid() {
        stats.start_timestamp
    } else {
        0
    };
    match kind {
        JumpKind::Absolute if timestamp == 0 => start,
        JumpKind::Absolute => timestamp,
        JumpKind::Relative => start.saturating_add(timestamp),
    }
}

fn recording_name(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|p| {
            p.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string())
        })
        .collect::<Vec<_>>()
        .join("+")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(start: u64, end: u64) -> FileStats {
        FileStats {
            start_timestamp: start,
            end_timestamp: end,
            total_size: 0,
        }
    }

    #[test]
    fn test_resolve_jump() {
        let s = stats(1_000, 9_000);
        assert_eq!(resolve_jump(s, 0, JumpKind::Absolute), 1_000);
        assert_eq!(resolve_jump(s, 5_000, JumpKind::Absolute), 5_000);
        assert_eq!(resolve_jump(s, u64::MAX, JumpKind::Absolute), u64::MAX);
        assert_eq!(resolve_jump(s, 500, JumpKind::Relative), 1_500);
        assert_eq!(resolve_jump(s, u64::MAX, JumpKind::Relative), u64::MAX);
        assert_eq!(resolve_jump(FileStats::EMPTY, 0, JumpKind::Absolute), 0);
    }

    #[test]
    fn test_recovery_depends_on_state() {
        let failed = Error::JumpFailed {
            timestamp: 5,
            reason: "seek".into(),
        };
        assert_eq!(recovery_for(PlayerState::Ready, &failed), vec![Event::Close]);
        assert_eq!(
            recovery_for(PlayerState::Play, &failed),
            vec![Event::Pause, Event::Close]
        );
        for state in [
            PlayerState::Opening,
            PlayerState::SkipTo,
            PlayerState::UnloadRecording,
        ] {
            assert_eq!(recovery_for(state, &failed), vec![Event::ResetOnFault]);
        }
        assert_eq!(
            recovery_for(PlayerState::Error, &failed),
            vec![Event::UnhandledError]
        );
        assert!(recovery_for(PlayerState::New, &failed).is_empty());

        let timeout = Error::TransitionTimeout {
            state: "play".into(),
            millis: 10,
        };
        assert_eq!(recovery_for(PlayerState::Ready, &timeout), vec![Event::Shutdown]);
    }

    #[test]
    fn test_recording_name() {
        let files = vec![PathBuf::from("/data/front.rpscn"), PathBuf::from("rear.rpscn")];
        assert_eq!(recording_name(&files), "front+rear");
    }

    #[test]
    fn test_event_for_step_forward() {
        let event = event_for(PlaybackRequest::step(3));
        assert_eq!(
            event,
            Event::StepForward(PlayRequest {
                steps: Some(3),
                until_timestamp: None,
                speed_factor: None
            })
        );
    }
}
