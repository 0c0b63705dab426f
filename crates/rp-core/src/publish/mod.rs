//! Outbound seams of the player: the package bus, the status sink and the
//! orchestrator receiving trigger calls.

pub mod bus;
pub mod stats;

use rp_common::{Package, StatusEvent};
use thiserror::Error;

pub use bus::{
    ChannelStatusSink, JsonLinesStatusSink, LogBus, LogStatusSink, NoopOrchestrator, NullBus,
    NullStatusSink, OrchestratorCall, PublishedPackage, RecordingBus, RecordingOrchestrator,
};
pub use stats::ReplayStatistics;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("bus rejected package at {timestamp}: {reason}")]
    Rejected { timestamp: u64, reason: String },

    #[error("bus disconnected")]
    Disconnected,
}

/// Destination for replayed packages.
pub trait PublishBus: Send + Sync {
    fn publish_package(&self, package: &Package) -> Result<(), PublishError>;
}

/// Destination for state and status events.
pub trait StatusSink: Send + Sync {
    fn publish_status(&self, event: &StatusEvent);
}

/// Routing key of a data trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataTrigger<'a> {
    Name(&'a str),
    Hash(u64),
}

/// Receives trigger calls as packages pass the publish loop.
///
/// All methods default to no-ops so implementors pick what they need.
pub trait Orchestrator: Send + Sync {
    fn on_data(&self, _timestamp: u64, _trigger: DataTrigger<'_>) {}

    fn on_cycle(&self, _cycle_id: u32, _is_start: bool, _timestamp: u64) {}

    fn on_timestamp(&self, _timestamp: u64) {}
}
