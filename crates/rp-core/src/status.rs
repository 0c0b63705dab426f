//! Player status: the shared status board and the rate-limited reporter.
//!
//! The command thread writes the current state to the [`StatusBoard`]; any
//! thread may read it or wait on it. Outgoing events go through a
//! [`StatusReporter`] worker so that rate limiting never blocks a
//! transition.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use rp_common::{
    FileStats, PlayerState, PlayerStatus, RecordingId, StatePhase, StatusEvent, StatusKind,
    SteppingInfo,
};
use rp_config::{keys, ConfigStore};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::player::StopReason;
use crate::publish::{ReplayStatistics, StatusSink};

#[derive(Debug, Clone, Default)]
struct BoardDetail {
    recording_id: Option<RecordingId>,
    recording_name: String,
    stats: Option<FileStats>,
    stepping: SteppingInfo,
    last_stop: Option<StopReason>,
    last_error: Option<(u32, String)>,
}

/// Current state plus recording details, readable from any thread.
#[derive(Debug)]
pub struct StatusBoard {
    state: AtomicU8,
    detail: Mutex<BoardDetail>,
    changed: Condvar,
    stats: Arc<ReplayStatistics>,
}

impl StatusBoard {
    pub fn new(stats: Arc<ReplayStatistics>) -> Self {
        StatusBoard {
            state: AtomicU8::new(PlayerState::New.as_u8()),
            detail: Mutex::new(BoardDetail::default()),
            changed: Condvar::new(),
            stats,
        }
    }

    pub fn state(&self) -> PlayerState {
        PlayerState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(PlayerState::Error)
    }

    pub fn set_state(&self, state: PlayerState) {
        // Hold the detail lock so waiters cannot miss the notification.
        let _detail = self.detail.lock();
        self.state.store(state.as_u8(), Ordering::Release);
        self.changed.notify_all();
    }

    /// Block until `pred` holds for the current state or `timeout` passes.
    /// Returns the last observed state and whether `pred` held.
    pub fn wait_for<F>(&self, pred: F, timeout: Duration) -> (PlayerState, bool)
    where
        F: Fn(PlayerState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut detail = self.detail.lock();
        loop {
            let state = self.state();
            if pred(state) {
                return (state, true);
            }
            if self.changed.wait_until(&mut detail, deadline).timed_out() {
                let state = self.state();
                return (state, pred(state));
            }
        }
    }

    pub fn set_recording(
        &self,
        recording_id: RecordingId,
        recording_name: String,
        stats: FileStats,
    ) {
        let mut detail = self.detail.lock();
        detail.recording_id = Some(recording_id);
        detail.recording_name = recording_name;
        detail.stats = Some(stats);
    }

    pub fn clear_recording(&self) -> Option<RecordingId> {
        let mut detail = self.detail.lock();
        detail.recording_name.clear();
        detail.stats = None;
        detail.last_stop = None;
        detail.recording_id.take()
    }

    pub fn recording_id(&self) -> Option<RecordingId> {
        self.detail.lock().recording_id.clone()
    }

    pub fn file_stats(&self) -> Option<FileStats> {
        self.detail.lock().stats
    }

    pub fn set_stepping(&self, stepping: SteppingInfo) {
        self.detail.lock().stepping = stepping;
    }

    pub fn set_last_stop(&self, reason: StopReason) {
        self.detail.lock().last_stop = Some(reason);
    }

    pub fn set_last_error(&self, code: u32, message: String) {
        self.detail.lock().last_error = Some((code, message));
    }

    /// Code and message of the most recent failure.
    pub fn last_error(&self) -> Option<(u32, String)> {
        self.detail.lock().last_error.clone()
    }

    /// Why the most recent play run ended.
    pub fn last_stop(&self) -> Option<StopReason> {
        self.detail.lock().last_stop
    }

    pub fn statistics(&self) -> &Arc<ReplayStatistics> {
        &self.stats
    }

    /// Build a status snapshot tagged with `phase`.
    pub fn snapshot(&self, phase: StatePhase) -> PlayerStatus {
        let detail = self.detail.lock();
        let (min_timestamp, max_timestamp) = detail
            .stats
            .filter(FileStats::is_valid)
            .map_or((0, 0), |s| (s.start_timestamp, s.end_timestamp));
        PlayerStatus {
            state: self.state(),
            phase,
            recording_name: detail.recording_name.clone(),
            min_timestamp,
            max_timestamp,
            current_timestamp: self.stats.current_timestamp(),
            speed_factor: self.stats.speed_factor(),
            stepping: detail.stepping,
            counters: self.stats.counters(),
        }
    }
}

/// Drops events arriving closer together than the interval, except final
/// ones.
#[derive(Debug, Clone)]
pub struct RateGate {
    interval: Duration,
    last: Option<Instant>,
}

impl RateGate {
    pub fn new(interval: Duration) -> Self {
        RateGate {
            interval,
            last: None,
        }
    }

    pub fn allow(&mut self, is_final: bool) -> bool {
        let now = Instant::now();
        let open = self
            .last
            .map_or(true, |last| now.duration_since(last) >= self.interval);
        if open || is_final {
            self.last = Some(now);
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReporterSettings {
    /// Minimum spacing between state events. Within a slot only the newest
    /// state is kept; other events are never delayed.
    pub state_throttle: Duration,
    pub periodic: Option<Duration>,
}

impl Default for ReporterSettings {
    fn default() -> Self {
        ReporterSettings {
            state_throttle: Duration::from_millis(500),
            periodic: Some(Duration::from_millis(1_000)),
        }
    }
}

impl ReporterSettings {
    pub fn from_config(config: &dyn ConfigStore) -> Self {
        let periodic = config
            .get_bool(keys::PERIODIC_ENABLED, true)
            .then(|| Duration::from_millis(config.get_uint(keys::PERIODIC_INTERVAL_MS, 1_000)))
            .filter(|d| !d.is_zero());
        ReporterSettings {
            state_throttle: Duration::from_millis(config.get_uint(keys::STATE_THROTTLE_MS, 500)),
            periodic,
        }
    }
}

enum ReporterMsg {
    State(PlayerStatus),
    Event(StatusKind),
    Stop,
}

/// Background worker delivering status events to a [`StatusSink`].
pub struct StatusReporter {
    tx: Sender<ReporterMsg>,
    handle: Option<JoinHandle<()>>,
}

impl StatusReporter {
    pub fn spawn(
        sink: Arc<dyn StatusSink>,
        board: Arc<StatusBoard>,
        settings: ReporterSettings,
    ) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name("recplay-status".into())
            .spawn(move || run_reporter(rx, sink.as_ref(), &board, settings))?;
        Ok(StatusReporter {
            tx,
            handle: Some(handle),
        })
    }

    pub fn report_state(&self, status: PlayerStatus) {
        if self.tx.send(ReporterMsg::State(status)).is_err() {
            warn!("status reporter is gone, dropping state event");
        }
    }

    pub fn report(&self, kind: StatusKind) {
        if self.tx.send(ReporterMsg::Event(kind)).is_err() {
            warn!("status reporter is gone, dropping event");
        }
    }

    /// Deliver everything queued so far, then stop the worker.
    pub fn stop(&mut self) {
        let _ = self.tx.send(ReporterMsg::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("status reporter panicked");
            }
        }
    }
}

impl Drop for StatusReporter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_reporter(
    rx: Receiver<ReporterMsg>,
    sink: &dyn StatusSink,
    board: &StatusBoard,
    settings: ReporterSettings,
) {
    let publish_state = |status: PlayerStatus| {
        sink.publish_status(&StatusEvent::now(StatusKind::State(status)));
    };
    let mut last_state: Option<Instant> = None;
    // Newest state held back by the throttle; older ones are superseded.
    let mut pending: Option<PlayerStatus> = None;
    let mut next_periodic = settings.periodic.map(|p| Instant::now() + p);
    loop {
        let slot_opens = last_state.map(|last| last + settings.state_throttle);
        let flush_at = pending.as_ref().and(slot_opens);
        let deadline = match (flush_at, next_periodic) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let received = match deadline {
            Some(deadline) => rx.recv_deadline(deadline),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        let msg = match received {
            Ok(msg) => msg,
            Err(RecvTimeoutError::Timeout) => {
                let now = Instant::now();
                if flush_at.is_some_and(|at| at <= now) {
                    if let Some(status) = pending.take() {
                        publish_state(status);
                        last_state = Some(now);
                    }
                }
                if next_periodic.is_some_and(|at| at <= now) {
                    publish_state(board.snapshot(StatePhase::On));
                    next_periodic = settings.periodic.map(|p| now + p);
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };
        match msg {
            ReporterMsg::State(status) => {
                let open = slot_opens.map_or(true, |at| Instant::now() >= at);
                if open && pending.is_none() {
                    publish_state(status);
                    last_state = Some(Instant::now());
                } else if pending.replace(status).is_some() {
                    debug!("superseded throttled state event");
                }
            }
            ReporterMsg::Event(kind) => sink.publish_status(&StatusEvent::now(kind)),
            ReporterMsg::Stop => break,
        }
    }
    if let Some(status) = pending.take() {
        publish_state(status);
    }
    debug!("status reporter stopped");
}
