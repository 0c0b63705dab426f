//! Two-stage guard for transitions that do not finish in time.
//!
//! When armed, the first expiry runs the `force` hook, which should make the
//! pending transition complete (cancel playback, release blocked threads).
//! If the watchdog is still armed after a second timeout, the `escalate`
//! hook runs and [`Watchdog::escalated`] turns true; waiters then give up
//! and the machine shuts down.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, warn};

type Hook = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Force,
    Escalate,
}

#[derive(Debug, Default)]
struct WatchState {
    armed: Option<(Instant, Stage)>,
    stop: bool,
}

struct Shared {
    state: Mutex<WatchState>,
    cv: Condvar,
    escalated: AtomicBool,
    forced: AtomicBool,
}

pub struct Watchdog {
    shared: Arc<Shared>,
    timeout: Duration,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn spawn(timeout: Duration, force: Hook, escalate: Hook) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(WatchState::default()),
            cv: Condvar::new(),
            escalated: AtomicBool::new(false),
            forced: AtomicBool::new(false),
        });
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("recplay-watchdog".into())
            .spawn(move || watch(&worker, timeout, force, escalate))?;
        Ok(Watchdog {
            shared,
            timeout,
            handle: Some(handle),
        })
    }

    /// A watchdog that never fires.
    pub fn disabled() -> Self {
        Watchdog {
            shared: Arc::new(Shared {
                state: Mutex::new(WatchState::default()),
                cv: Condvar::new(),
                escalated: AtomicBool::new(false),
                forced: AtomicBool::new(false),
            }),
            timeout: Duration::ZERO,
            handle: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.handle.is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn arm(&self) {
        if !self.is_enabled() {
            return;
        }
        self.shared.forced.store(false, Ordering::Release);
        self.shared.state.lock().armed = Some((Instant::now() + self.timeout, Stage::Force));
        self.shared.cv.notify_all();
    }

    pub fn disarm(&self) {
        self.shared.state.lock().armed = None;
        self.shared.cv.notify_all();
    }

    /// The force hook ran since the last [`Watchdog::arm`].
    pub fn forced(&self) -> bool {
        self.shared.forced.load(Ordering::Acquire)
    }

    pub fn escalated(&self) -> bool {
        self.shared.escalated.load(Ordering::Acquire)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.shared.state.lock().stop = true;
        self.shared.cv.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn watch(shared: &Shared, timeout: Duration, force: Hook, escalate: Hook) {
    let mut state = shared.state.lock();
    loop {
        if state.stop {
            return;
        }
        let Some((deadline, stage)) = state.armed else {
            shared.cv.wait(&mut state);
            continue;
        };
        if Instant::now() < deadline {
            shared.cv.wait_until(&mut state, deadline);
            continue;
        }
        match stage {
            Stage::Force => {
                state.armed = Some((Instant::now() + timeout, Stage::Escalate));
                drop(state);
                warn!(timeout_ms = timeout.as_millis() as u64, "transition timed out, forcing completion");
                shared.forced.store(true, Ordering::Release);
                force();
            }
            Stage::Escalate => {
                state.armed = None;
                drop(state);
                error!("forced transition did not complete, escalating");
                shared.escalated.store(true, Ordering::Release);
                escalate();
            }
        }
        state = shared.state.lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_hooks() -> (Arc<AtomicUsize>, Arc<AtomicUsize>, Hook, Hook) {
        let forced = Arc::new(AtomicUsize::new(0));
        let escalated = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&forced);
        let e = Arc::clone(&escalated);
        (
            forced,
            escalated,
            Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            }),
            Box::new(move || {
                e.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn test_disarm_in_time_is_silent() {
        let (forced, escalated, f, e) = counting_hooks();
        let dog = Watchdog::spawn(Duration::from_millis(50), f, e).unwrap();
        dog.arm();
        dog.disarm();
        thread::sleep(Duration::from_millis(120));
        assert_eq!(forced.load(Ordering::SeqCst), 0);
        assert_eq!(escalated.load(Ordering::SeqCst), 0);
        assert!(!dog.escalated());
    }

    #[test]
    fn test_force_then_escalate() {
        let (forced, escalated, f, e) = counting_hooks();
        let dog = Watchdog::spawn(Duration::from_millis(20), f, e).unwrap();
        dog.arm();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !dog.escalated() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(dog.forced());
        assert_eq!(forced.load(Ordering::SeqCst), 1);
        assert_eq!(escalated.load(Ordering::SeqCst), 1);
        assert!(dog.escalated());
    }

    #[test]
    fn test_disabled_never_fires() {
        let dog = Watchdog::disabled();
        dog.arm();
        assert!(!dog.is_enabled());
        assert!(!dog.escalated());
    }
}
