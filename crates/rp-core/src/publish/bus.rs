//! In-process implementations of the outbound seams.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use rp_common::{CycleState, Package, StatusEvent, StatusKind};
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{DataTrigger, Orchestrator, PublishBus, PublishError, StatusSink};

// ── Buses ───────────────────────────────────────────────────────────────

/// Accepts and discards every package.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBus;

impl PublishBus for NullBus {
    fn publish_package(&self, _package: &Package) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Logs every package at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBus;

impl PublishBus for LogBus {
    fn publish_package(&self, package: &Package) -> Result<(), PublishError> {
        let header = package.header();
        debug!(
            timestamp = header.timestamp,
            cycle_id = header.cycle_id,
            cycle_state = %header.cycle_state,
            size = package.size(),
            "publish"
        );
        Ok(())
    }
}

/// What a [`RecordingBus`] saw of one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedPackage {
    pub timestamp: u64,
    pub cycle_id: u32,
    pub cycle_state: CycleState,
    pub size: usize,
}

type PublishHook = Arc<dyn Fn(u64) + Send + Sync>;

/// Captures published packages; can be told to fail or stall.
#[derive(Default)]
pub struct RecordingBus {
    published: Mutex<Vec<PublishedPackage>>,
    fail_at: Mutex<HashSet<u64>>,
    delay: Mutex<Duration>,
    hook: Mutex<Option<PublishHook>>,
}

impl std::fmt::Debug for RecordingBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingBus")
            .field("published", &self.published.lock().len())
            .field("delay", &*self.delay.lock())
            .field("hooked", &self.hook.lock().is_some())
            .finish()
    }
}

impl RecordingBus {
    pub fn new() -> Self {
        RecordingBus::default()
    }

    /// Reject packages with this timestamp.
    pub fn fail_at(&self, timestamp: u64) {
        self.fail_at.lock().insert(timestamp);
    }

    /// Sleep this long inside every publish call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Call `hook` with the timestamp of every package, before it is recorded.
    pub fn set_hook(&self, hook: impl Fn(u64) + Send + Sync + 'static) {
        *self.hook.lock() = Some(Arc::new(hook));
    }

    pub fn published(&self) -> Vec<PublishedPackage> {
        self.published.lock().clone()
    }

    pub fn timestamps(&self) -> Vec<u64> {
        self.published.lock().iter().map(|p| p.timestamp).collect()
    }

    pub fn len(&self) -> usize {
        self.published.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.lock().is_empty()
    }
}

impl PublishBus for RecordingBus {
    fn publish_package(&self, package: &Package) -> Result<(), PublishError> {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let header = package.header();
        let hook = self.hook.lock().clone();
        if let Some(hook) = hook {
            hook(header.timestamp);
        }
        if self.fail_at.lock().contains(&header.timestamp) {
            return Err(PublishError::Rejected {
                timestamp: header.timestamp,
                reason: "configured failure".to_string(),
            });
        }
        self.published.lock().push(PublishedPackage {
            timestamp: header.timestamp,
            cycle_id: header.cycle_id,
            cycle_state: header.cycle_state,
            size: package.size(),
        });
        Ok(())
    }
}

// ── Status sinks ────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct NullStatusSink;

impl StatusSink for NullStatusSink {
    fn publish_status(&self, _event: &StatusEvent) {}
}

/// Forwards events into a channel.
#[derive(Debug, Clone)]
pub struct ChannelStatusSink {
    tx: Sender<StatusEvent>,
}

impl ChannelStatusSink {
    /// Sink plus the receiving end of an unbounded channel.
    pub fn pair() -> (Self, Receiver<StatusEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (ChannelStatusSink { tx }, rx)
    }

    pub fn new(tx: Sender<StatusEvent>) -> Self {
        ChannelStatusSink { tx }
    }
}

impl StatusSink for ChannelStatusSink {
    fn publish_status(&self, event: &StatusEvent) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.tx.send(event.clone());
    }
}

/// Writes one JSON document per event, newline separated.
pub struct JsonLinesStatusSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesStatusSink<W> {
    pub fn new(out: W) -> Self {
        JsonLinesStatusSink {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> StatusSink for JsonLinesStatusSink<W> {
    fn publish_status(&self, event: &StatusEvent) {
        let mut out = self.out.lock();
        let result = serde_json::to_writer(&mut *out, event)
            .map_err(std::io::Error::from)
            .and_then(|()| out.write_all(b"\n"))
            .and_then(|()| out.flush());
        if let Err(err) = result {
            warn!(error = %err, "failed to write status event");
        }
    }
}

/// Logs events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn publish_status(&self, event: &StatusEvent) {
        match &event.kind {
            StatusKind::State(status) => info!(
                status = %status.label(),
                current = status.current_timestamp,
                speed = status.speed_factor,
                "player status"
            ),
            StatusKind::OpenProgress {
                file,
                current,
                total,
                ..
            } => debug!(file = %file, current, total, "open progress"),
            kind if kind.is_failure() => {
                warn!(code = kind.error_code(), event = ?kind, "player failure")
            }
            kind => info!(event = ?kind, "player event"),
        }
    }
}

// ── Orchestrators ───────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOrchestrator;

impl Orchestrator for NoopOrchestrator {}

/// Owned copy of one trigger call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorCall {
    DataName { timestamp: u64, name: String },
    DataHash { timestamp: u64, hash: u64 },
    Cycle { cycle_id: u32, is_start: bool, timestamp: u64 },
    Timestamp(u64),
}

/// Captures every trigger call in order.
#[derive(Debug, Default)]
pub struct RecordingOrchestrator {
    calls: Mutex<Vec<OrchestratorCall>>,
}

impl RecordingOrchestrator {
    pub fn new() -> Self {
        RecordingOrchestrator::default()
    }

    pub fn calls(&self) -> Vec<OrchestratorCall> {
        self.calls.lock().clone()
    }
}

impl Orchestrator for RecordingOrchestrator {
    fn on_data(&self, timestamp: u64, trigger: DataTrigger<'_>) {
        let call = match trigger {
            DataTrigger::Name(name) => OrchestratorCall::DataName {
                timestamp,
                name: name.to_string(),
            },
            DataTrigger::Hash(hash) => OrchestratorCall::DataHash { timestamp, hash },
        };
        self.calls.lock().push(call);
    }

    fn on_cycle(&self, cycle_id: u32, is_start: bool, timestamp: u64) {
        self.calls.lock().push(OrchestratorCall::Cycle {
            cycle_id,
            is_start,
            timestamp,
        });
    }

    fn on_timestamp(&self, timestamp: u64) {
        self.calls.lock().push(OrchestratorCall::Timestamp(timestamp));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rp_common::{PackageHeader, PlayerStatus};

    #[test]
    fn test_recording_bus_failures() {
        let bus = RecordingBus::new();
        bus.fail_at(2);
        let ok = Package::new(PackageHeader::new(1), vec![0; 4]);
        let bad = Package::new(PackageHeader::new(2), vec![0; 4]);
        assert!(bus.publish_package(&ok).is_ok());
        assert!(matches!(
            bus.publish_package(&bad),
            Err(PublishError::Rejected { timestamp: 2, .. })
        ));
        assert_eq!(bus.timestamps(), vec![1]);
        assert_eq!(bus.published()[0].size, 4);
    }

    #[test]
    fn test_json_lines_sink() {
        let sink = JsonLinesStatusSink::new(Vec::new());
        sink.publish_status(&StatusEvent::now(StatusKind::State(PlayerStatus::idle())));
        sink.publish_status(&StatusEvent::now(StatusKind::RecordingClosed {
            recording_id: None,
        }));
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "state");
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "recording_closed");
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelStatusSink::pair();
        sink.publish_status(&StatusEvent::now(StatusKind::RecordingClosed {
            recording_id: None,
        }));
        assert_eq!(rx.len(), 1);
        drop(rx);
        sink.publish_status(&StatusEvent::now(StatusKind::RecordingClosed {
            recording_id: None,
        }));
    }

    #[test]
    fn test_recording_orchestrator_order() {
        let orch = RecordingOrchestrator::new();
        orch.on_data(5, DataTrigger::Name("cam"));
        orch.on_timestamp(5);
        orch.on_cycle(3, true, 5);
        assert_eq!(
            orch.calls(),
            vec![
                OrchestratorCall::DataName {
                    timestamp: 5,
                    name: "cam".into()
                },
                OrchestratorCall::Timestamp(5),
                OrchestratorCall::Cycle {
                    cycle_id: 3,
                    is_start: true,
                    timestamp: 5
                },
            ]
        );
    }
}
