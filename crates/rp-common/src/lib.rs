//! recplay common types, IDs, and errors.
//!
//! This crate provides foundational types shared across rp-core modules:
//! - Packages, headers and cycle framing flags
//! - Recording metadata (file stats, data and cycle descriptions)
//! - Control commands and status events with JSON schemas
//! - Common error types with stable numeric codes

pub mod command;
pub mod descriptions;
pub mod error;
pub mod id;
pub mod package;
pub mod schema;
pub mod status;

pub use command::{CommandEnvelope, JumpKind, PlaybackRequest};
pub use descriptions::{CycleDescription, DataDescription, FileStats};
pub use error::{Error, Result};
pub use id::RecordingId;
pub use package::{CycleState, MetaInfo, Package, PackageHeader, PackageMeta};
pub use schema::SCHEMA_VERSION;
pub use status::{
    PlayerState, PlayerStatus, ReplayCounters, StatePhase, StatusEvent, StatusKind,
    SteppingInfo, SteppingKind,
};
