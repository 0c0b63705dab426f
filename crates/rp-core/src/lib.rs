//! recplay replay engine.
//!
//! Merges time-stamped packages from several recording files into one
//! ordered stream and republishes it onto a bus under a control state
//! machine, with read-ahead buffering, speed pacing and stepping.
//!
//! - [`reader`]: reader trait, registry, built-in readers, synchronizer
//! - [`buffer`]: bounded read-ahead queue
//! - [`pacing`]: speed factor controller
//! - [`player`]: state machine, publish loop, control handle
//! - [`publish`]: bus, status sink and orchestrator seams
//! - [`status`]: status board and rate-limited reporter

pub mod buffer;
pub mod exit_codes;
pub mod logging;
pub mod pacing;
pub mod player;
pub mod publish;
pub mod reader;
pub mod status;

pub use exit_codes::ExitCode;
pub use player::{Player, PlayerContext, PlayerHandle, StopReason};
