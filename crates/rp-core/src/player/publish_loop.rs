//! The loop that moves packages from the buffer onto the bus during Play.

use parking_lot::Mutex;
use rp_common::PackageMeta;
use serde::Serialize;
use std::fmt;
use tracing::{trace, warn};

use super::stepping::{StepBudget, Stepper};
use crate::buffer::BufferQueue;
use crate::pacing::SpeedFactor;
use crate::publish::{DataTrigger, Orchestrator, PublishBus, ReplayStatistics};

/// Why a play run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    StepsExhausted,
    UntilReached,
    EndOfFile,
    Paused,
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::StepsExhausted => "steps_exhausted",
            StopReason::UntilReached => "until_reached",
            StopReason::EndOfFile => "end_of_file",
            StopReason::Paused => "paused",
            StopReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Stop request shared between the command thread and a running loop.
#[derive(Debug, Default)]
pub struct PlayControl {
    stop: Mutex<Option<StopReason>>,
}

impl PlayControl {
    pub fn new() -> Self {
        PlayControl::default()
    }

    /// First request wins.
    pub fn request_stop(&self, reason: StopReason) {
        self.stop.lock().get_or_insert(reason);
    }

    pub fn requested(&self) -> Option<StopReason> {
        *self.stop.lock()
    }
}

/// Everything one play run needs.
pub struct PublishLoop<'a> {
    pub buffer: &'a BufferQueue,
    pub speed: &'a SpeedFactor,
    pub stats: &'a ReplayStatistics,
    pub bus: &'a dyn PublishBus,
    pub orchestrator: &'a dyn Orchestrator,
    pub control: &'a PlayControl,
    pub stepper: Stepper,
    pub budget: StepBudget,
    pub until_timestamp: Option<u64>,
}

impl PublishLoop<'_> {
    pub fn run(mut self) -> StopReason {
        loop {
            if self.budget.exhausted() {
                return StopReason::StepsExhausted;
            }
            if let Some(reason) = self.control.requested() {
                return reason;
            }

            let (package, end_of_file) = self.buffer.pop();
            let Some(package) = package else {
                if end_of_file {
                    return StopReason::EndOfFile;
                }
                return self.control.requested().unwrap_or(StopReason::Paused);
            };

            let header = package.header();
            let ts = header.timestamp;
            if package.has_payload() {
                match self.bus.publish_package(&package) {
                    Ok(()) => self.stats.record_published(package.size()),
                    Err(err) => {
                        self.stats.record_failure();
                        warn!(timestamp = ts, error = %err, "publish failed");
                    }
                }
            }

            match package.meta() {
                PackageMeta::Name(name) => self.orchestrator.on_data(ts, DataTrigger::Name(name)),
                PackageMeta::Info(info) => self
                    .orchestrator
                    .on_data(ts, DataTrigger::Hash(info.routing_hash())),
                PackageMeta::None => {}
            }
            self.orchestrator.on_timestamp(ts);
            if header.cycle_state.is_start() {
                self.orchestrator.on_cycle(header.cycle_id, true, ts);
            }
            if header.cycle_state.is_end() {
                self.orchestrator.on_cycle(header.cycle_id, false, ts);
            }

            if let Some(measured) = self.speed.update(ts) {
                trace!(measured, "speed factor");
                self.stats.set_speed_factor(measured);
            }
            self.stats.set_current_timestamp(ts);

            let steps = self.stepper.observe(&header);
            self.budget.consume(steps);

            if self.until_timestamp.is_some_and(|until| ts >= until) {
                return StopReason::UntilReached;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferLimits;
    use crate::pacing::{ManualClock, PacingSettings};
    use crate::player::stepping::SteppingMode;
    use crate::publish::{OrchestratorCall, RecordingBus, RecordingOrchestrator};
    use rp_common::{CycleState, MetaInfo, Package, PackageHeader};
    use std::sync::Arc;

    struct Rig {
        buffer: BufferQueue,
        speed: SpeedFactor,
        stats: ReplayStatistics,
        bus: RecordingBus,
        orchestrator: RecordingOrchestrator,
        control: PlayControl,
    }

    impl Rig {
        fn new(packages: Vec<Package>) -> Self {
            let buffer = BufferQueue::new(BufferLimits {
                max_bytes: u64::MAX,
                max_time_span: u64::MAX,
            });
            for p in packages {
                buffer.push(p).unwrap();
            }
            let settings = PacingSettings {
                target: 0.0,
                ..PacingSettings::default()
            };
            Rig {
                buffer,
                speed: SpeedFactor::new(settings, Arc::new(ManualClock::new())),
                stats: ReplayStatistics::new(),
                bus: RecordingBus::new(),
                orchestrator: RecordingOrchestrator::new(),
                control: PlayControl::new(),
            }
        }

        fn run(&self, mode: SteppingMode, steps: Option<u64>, until: Option<u64>) -> StopReason {
            PublishLoop {
                buffer: &self.buffer,
                speed: &self.speed,
                stats: &self.stats,
                bus: &self.bus,
                orchestrator: &self.orchestrator,
                control: &self.control,
                stepper: Stepper::new(mode),
                budget: StepBudget::from_request(steps),
                until_timestamp: until,
            }
            .run()
        }
    }

    fn plain(ts: u64) -> Package {
        Package::new(PackageHeader::new(ts), vec![0; 2])
    }

    fn end_of(ts: u64, cycle: u32) -> Package {
        Package::new(PackageHeader::new(ts).with_cycle(cycle, CycleState::END), Vec::new())
    }

    #[test]
    fn test_cycle_stepping_example() {
        let rig = Rig::new(vec![
            plain(1),
            end_of(102, 9),
            plain(120),
            end_of(203, 9),
            end_of(304, 9),
            plain(405),
        ]);
        let reason = rig.run(SteppingMode::CycleId(9), Some(3), None);
        assert_eq!(reason, StopReason::StepsExhausted);
        assert_eq!(rig.bus.timestamps(), vec![1, 120]);
        assert_eq!(rig.buffer.len(), 1);
        assert_eq!(rig.stats.current_timestamp(), 304);
    }

    #[test]
    fn test_until_and_end_of_file() {
        let rig = Rig::new((1..=5).map(plain).collect());
        assert_eq!(rig.run(SteppingMode::Package, None, Some(3)), StopReason::UntilReached);
        assert_eq!(rig.bus.timestamps(), vec![1, 2, 3]);

        rig.buffer.set_end_of_file();
        assert_eq!(rig.run(SteppingMode::Package, None, None), StopReason::EndOfFile);
        assert_eq!(rig.bus.len(), 5);
    }

    #[test]
    fn test_failures_are_counted_and_skipped() {
        let rig = Rig::new((1..=3).map(plain).collect());
        rig.bus.fail_at(2);
        rig.run(SteppingMode::Package, Some(3), None);
        let counters = rig.stats.counters();
        assert_eq!(counters.published_packages, 2);
        assert_eq!(counters.published_bytes, 4);
        assert_eq!(counters.publish_failures, 1);
    }

    #[test]
    fn test_triggers() {
        let info = MetaInfo {
            source_id: 1,
            instance_number: 2,
            cycle_id: 3,
            virtual_address: 4,
        };
        let rig = Rig::new(vec![
            Package::new(PackageHeader::new(1).with_cycle(3, CycleState::START), Vec::new())
                .with_meta(PackageMeta::Name("cam".into())),
            Package::new(PackageHeader::new(2).with_cycle(3, CycleState::END), Vec::new())
                .with_meta(PackageMeta::Info(info)),
        ]);
        rig.run(SteppingMode::Package, Some(2), None);
        assert_eq!(
            rig.orchestrator.calls(),
            vec![
                OrchestratorCall::DataName {
                    timestamp: 1,
                    name: "cam".into()
                },
                OrchestratorCall::Timestamp(1),
                OrchestratorCall::Cycle {
                    cycle_id: 3,
                    is_start: true,
                    timestamp: 1
                },
                OrchestratorCall::DataHash {
                    timestamp: 2,
                    hash: info.routing_hash()
                },
                OrchestratorCall::Timestamp(2),
                OrchestratorCall::Cycle {
                    cycle_id: 3,
                    is_start: false,
                    timestamp: 2
                },
            ]
        );
        assert!(rig.bus.is_empty());
    }

    #[test]
    fn test_stop_request_and_pause() {
        let rig = Rig::new((1..=3).map(plain).collect());
        rig.control.request_stop(StopReason::Cancelled);
        rig.control.request_stop(StopReason::Paused);
        assert_eq!(rig.run(SteppingMode::Package, None, None), StopReason::Cancelled);
        assert!(rig.bus.is_empty());

        let rig = Rig::new(Vec::new());
        rig.buffer.pause();
        assert_eq!(rig.run(SteppingMode::Package, None, None), StopReason::Paused);
    }
}
