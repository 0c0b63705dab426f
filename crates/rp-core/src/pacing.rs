//! Closed-loop pacing of simulated time against wall-clock time.
//!
//! [`SpeedFactor::update`] is called once per delivered package. When the
//! simulated clock runs ahead of `target × wall`, the caller is put to sleep
//! for the difference (bounded). Every report interval the measured ratio of
//! simulated to wall time is returned for status reporting.

use parking_lot::Mutex;
use rp_config::{keys, ConfigStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Time source for pacing. Swappable so tests run without real sleeps.
pub trait Clock: Send + Sync {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that only moves when told to; `sleep` advances it instantly.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
    slept: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    /// Total time spent in [`Clock::sleep`].
    pub fn total_slept(&self) -> Duration {
        *self.slept.lock()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) {
        *self.slept.lock() += duration;
        self.advance(duration);
    }
}

/// Tunables for [`SpeedFactor`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingSettings {
    /// Target simulated/wall ratio. Zero or negative runs unpaced.
    pub target: f64,
    pub check_period: Duration,
    pub report_interval: Duration,
    pub max_wait: Duration,
}

impl Default for PacingSettings {
    fn default() -> Self {
        PacingSettings {
            target: 10.0,
            check_period: Duration::from_millis(25),
            report_interval: Duration::from_millis(500),
            max_wait: Duration::from_millis(2_000),
        }
    }
}

impl PacingSettings {
    pub fn from_config(config: &dyn ConfigStore) -> Self {
        let d = PacingSettings::default();
        PacingSettings {
            target: config.get_float(keys::REALTIME_FACTOR, d.target),
            check_period: Duration::from_millis(
                config.get_uint(keys::CHECK_PERIOD_MS, d.check_period.as_millis() as u64),
            ),
            report_interval: Duration::from_millis(
                config.get_uint(keys::REPORT_INTERVAL_MS, d.report_interval.as_millis() as u64),
            ),
            max_wait: Duration::from_millis(
                config.get_uint(keys::MAX_PACING_WAIT_MS, d.max_wait.as_millis() as u64),
            ),
        }
    }
}

#[derive(Debug)]
struct State {
    settings: PacingSettings,
    /// Simulated µs at the last checkpoint; `None` right after a reset.
    last_sim: Option<u64>,
    last_wall: Duration,
    window_sim: Duration,
    window_wall: Duration,
    last_measured: Option<f32>,
    /// Bumped by every reset so a sleeping update can tell it went stale.
    generation: u64,
}

impl State {
    fn restart(&mut self, sim: Option<u64>, wall: Duration) {
        self.last_sim = sim;
        self.last_wall = wall;
        self.window_sim = Duration::ZERO;
        self.window_wall = Duration::ZERO;
    }
}

/// Whether `target` may be used as a pacing target. Zero and negative
/// values are accepted and mean "unpaced".
pub fn is_valid_factor(target: f64) -> bool {
    target.is_finite()
}

fn is_paced(target: f64) -> bool {
    target.is_finite() && target > 0.0
}

/// Keeps simulated time at a fixed multiple of wall time.
pub struct SpeedFactor {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl SpeedFactor {
    pub fn new(settings: PacingSettings, clock: Arc<dyn Clock>) -> Self {
        SpeedFactor {
            clock,
            state: Mutex::new(State {
                settings,
                last_sim: None,
                last_wall: Duration::ZERO,
                window_sim: Duration::ZERO,
                window_wall: Duration::ZERO,
                last_measured: None,
                generation: 0,
            }),
        }
    }

    pub fn from_config(config: &dyn ConfigStore, clock: Arc<dyn Clock>) -> Self {
        SpeedFactor::new(PacingSettings::from_config(config), clock)
    }

    /// Account for a package at simulated time `timestamp` (µs), sleeping if
    /// playback is ahead of target. Returns the measured factor once per
    /// report interval.
    pub fn update(&self, timestamp: u64) -> Option<f32> {
        let mut state = self.state.lock();
        let now = self.clock.now();
        let Some(last_sim) = state.last_sim else {
            state.restart(Some(timestamp), now);
            return None;
        };
        if timestamp < last_sim {
            trace!(timestamp, last_sim, "timestamp went backwards, restarting pacing");
            state.restart(Some(timestamp), now);
            return None;
        }

        let settings = state.settings;
        let sim = Duration::from_micros(timestamp - last_sim);
        let wall = now.saturating_sub(state.last_wall);
        let paced = is_paced(settings.target);
        // Seconds in f64: a tiny target scales past what `Duration` holds.
        let scaled_sim = if paced {
            sim.as_secs_f64() / settings.target
        } else {
            0.0
        };
        let check = settings.check_period.as_secs_f64();
        if wall < settings.check_period && scaled_sim < check {
            return None;
        }

        if paced && scaled_sim > wall.as_secs_f64() {
            let wait_secs = (scaled_sim - wall.as_secs_f64()).min(settings.max_wait.as_secs_f64());
            let wait = Duration::try_from_secs_f64(wait_secs).unwrap_or(settings.max_wait);
            let generation = state.generation;
            drop(state);
            self.clock.sleep(wait);
            state = self.state.lock();
            if state.generation != generation {
                return None;
            }
        }

        let now = self.clock.now();
        let wall = now.saturating_sub(state.last_wall);
        state.window_sim += sim;
        state.window_wall += wall;
        state.last_sim = Some(timestamp);
        state.last_wall = now;

        if state.window_wall >= settings.report_interval && !state.window_wall.is_zero() {
            let measured = (state.window_sim.as_secs_f64() / state.window_wall.as_secs_f64()) as f32;
            state.window_sim = Duration::ZERO;
            state.window_wall = Duration::ZERO;
            state.last_measured = Some(measured);
            return Some(measured);
        }
        None
    }

    /// Change the target. The measurement window restarts.
    ///
    /// Non-finite targets are refused and leave the current one in place.
    pub fn set_factor(&self, target: f64) -> bool {
        if !is_valid_factor(target) {
            warn!(target, "refusing non-finite speed factor");
            return false;
        }
        let mut state = self.state.lock();
        state.settings.target = target;
        state.window_sim = Duration::ZERO;
        state.window_wall = Duration::ZERO;
        true
    }

    pub fn factor(&self) -> f64 {
        self.state.lock().settings.target
    }

    /// Most recent measured factor, if one was reported yet.
    pub fn measured(&self) -> Option<f32> {
        self.state.lock().last_measured
    }

    /// Forget history; the next update only sets a checkpoint.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        state.restart(None, Duration::ZERO);
    }
}

impl std::fmt::Debug for SpeedFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeedFactor")
            .field("state", &*self.state.lock())
            .finish()
    }
}
