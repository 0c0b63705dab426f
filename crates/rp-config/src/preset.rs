//! Named configuration presets for common replay setups.

use rp_common::SteppingKind;
use serde::Serialize;
use std::str::FromStr;

use crate::player::PlayerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresetName {
    /// Shipped defaults.
    Default,
    /// Simulated time tracks wall time one to one.
    Realtime,
    /// No pacing, large read-ahead.
    Fast,
    /// Step one monitored cycle at a time, no pacing.
    CycleStep,
}

impl PresetName {
    pub const ALL: [PresetName; 4] = [
        PresetName::Default,
        PresetName::Realtime,
        PresetName::Fast,
        PresetName::CycleStep,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PresetName::Default => "default",
            PresetName::Realtime => "realtime",
            PresetName::Fast => "fast",
            PresetName::CycleStep => "cycle-step",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("unknown preset '{0}' (available: default, realtime, fast, cycle-step)")]
    Unknown(String),
}

impl FromStr for PresetName {
    type Err = PresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PresetName::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PresetError::Unknown(s.to_string()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PresetInfo {
    pub name: PresetName,
    pub description: &'static str,
}

pub fn list_presets() -> Vec<PresetInfo> {
    PresetName::ALL
        .into_iter()
        .map(|name| PresetInfo {
            name,
            description: match name {
                PresetName::Default => "shipped defaults, 10x pacing",
                PresetName::Realtime => "1x pacing for hardware-in-the-loop style replay",
                PresetName::Fast => "unpaced replay with a 256 MB read-ahead budget",
                PresetName::CycleStep => "unpaced, one step per completed cycle 0",
            },
        })
        .collect()
}

pub fn get_preset(name: PresetName) -> PlayerConfig {
    let mut cfg = PlayerConfig::default();
    match name {
        PresetName::Default => {}
        PresetName::Realtime => {
            cfg.playback.realtime_factor = 1.0;
        }
        PresetName::Fast => {
            cfg.playback.realtime_factor = 0.0;
            cfg.buffer.max_read_ahead_mb = 256;
        }
        PresetName::CycleStep => {
            cfg.playback.realtime_factor = 0.0;
            cfg.stepping.mode = SteppingKind::CycleId;
            cfg.stepping.cycle_id = 0;
        }
    }
    cfg
}
