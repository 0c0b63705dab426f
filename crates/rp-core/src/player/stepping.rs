//! What counts as one step during playback.

use rp_common::{PackageHeader, SteppingInfo, SteppingKind};
use rp_config::{keys, ConfigStore};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SteppingMode {
    /// Every package is a step.
    Package,
    /// A step ends with each cycle end of the monitored cycle id.
    CycleId(u32),
    /// A step is this many simulated µs.
    Timestamp(u64),
}

impl SteppingMode {
    pub fn from_config(config: &dyn ConfigStore) -> Self {
        match config.get_string(keys::STEPPING_MODE, "package").as_str() {
            "package" => SteppingMode::Package,
            "cycle_id" => {
                SteppingMode::CycleId(config.get_uint(keys::STEPPING_CYCLE_ID, 0) as u32)
            }
            "timestamp" => match config.get_uint(keys::STEPPING_STEP_SIZE_US, 100) {
                0 => SteppingMode::Package,
                step => SteppingMode::Timestamp(step),
            },
            other => {
                warn!(mode = other, "unknown stepping mode, stepping per package");
                SteppingMode::Package
            }
        }
    }

    pub fn info(self) -> SteppingInfo {
        match self {
            SteppingMode::Package => SteppingInfo {
                kind: SteppingKind::Package,
                value: 0,
            },
            SteppingMode::CycleId(id) => SteppingInfo {
                kind: SteppingKind::CycleId,
                value: u64::from(id),
            },
            SteppingMode::Timestamp(step) => SteppingInfo {
                kind: SteppingKind::Timestamp,
                value: step,
            },
        }
    }
}

/// Remaining steps of one play run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepBudget {
    Unlimited,
    Steps(u64),
}

impl StepBudget {
    pub fn from_request(steps: Option<u64>) -> Self {
        steps.map_or(StepBudget::Unlimited, StepBudget::Steps)
    }

    pub fn exhausted(self) -> bool {
        self == StepBudget::Steps(0)
    }

    pub fn consume(&mut self, steps: u64) {
        if let StepBudget::Steps(left) = self {
            *left = left.saturating_sub(steps);
        }
    }
}

/// Counts completed steps as packages pass.
#[derive(Debug, Clone)]
pub struct Stepper {
    mode: SteppingMode,
    last_step_ts: Option<u64>,
}

impl Stepper {
    pub fn new(mode: SteppingMode) -> Self {
        Stepper {
            mode,
            last_step_ts: None,
        }
    }

    pub fn mode(&self) -> SteppingMode {
        self.mode
    }

    /// Steps completed by this package (0 or 1).
    pub fn observe(&mut self, header: &PackageHeader) -> u64 {
        match self.mode {
            SteppingMode::Package => 1,
            SteppingMode::CycleId(id) => {
                u64::from(header.cycle_state.is_end() && header.cycle_id == id)
            }
            SteppingMode::Timestamp(step) => match self.last_step_ts {
                None => {
                    self.last_step_ts = Some(header.timestamp);
                    0
                }
                Some(last) if header.timestamp.saturating_sub(last) >= step => {
                    self.last_step_ts = Some(header.timestamp);
                    1
                }
                Some(_) => 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rp_common::CycleState;
    use rp_config::PlayerConfig;

    fn count(stepper: &mut Stepper, headers: &[PackageHeader]) -> Vec<u64> {
        headers.iter().map(|h| stepper.observe(h)).collect()
    }

    #[test]
    fn test_mode_from_config() {
        let mut config = PlayerConfig::default();
        assert_eq!(SteppingMode::from_config(&config), SteppingMode::Package);

        config.stepping.mode = SteppingKind::CycleId;
        config.stepping.cycle_id = 7;
        assert_eq!(SteppingMode::from_config(&config), SteppingMode::CycleId(7));

        config.stepping.mode = SteppingKind::Timestamp;
        assert_eq!(SteppingMode::from_config(&config), SteppingMode::Timestamp(100));
        config.stepping.step_size_us = 0;
        assert_eq!(SteppingMode::from_config(&config), SteppingMode::Package);
    }

    #[test]
    fn test_cycle_steps_count_only_monitored_ends() {
        let mut stepper = Stepper::new(SteppingMode::CycleId(4));
        let headers = [
            PackageHeader::new(1).with_cycle(4, CycleState::START),
            PackageHeader::new(2).with_cycle(4, CycleState::END),
            PackageHeader::new(3).with_cycle(5, CycleState::END),
            PackageHeader::new(4),
        ];
        assert_eq!(count(&mut stepper, &headers), vec![0, 1, 0, 0]);
    }

    #[test]
    fn test_timestamp_steps() {
        let mut stepper = Stepper::new(SteppingMode::Timestamp(100));
        let headers: Vec<_> = [1, 102, 120, 203, 304]
            .into_iter()
            .map(PackageHeader::new)
            .collect();
        assert_eq!(count(&mut stepper, &headers), vec![0, 1, 0, 1, 1]);
    }

    #[test]
    fn test_budget() {
        let mut budget = StepBudget::from_request(Some(2));
        assert!(!budget.exhausted());
        budget.consume(1);
        budget.consume(5);
        assert!(budget.exhausted());

        let mut unlimited = StepBudget::from_request(None);
        unlimited.consume(1_000);
        assert!(!unlimited.exhausted());
    }
}
