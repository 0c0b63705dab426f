//! Packages: single timestamped units of recorded data.
//!
//! A [`Package`] is owned by exactly one pipeline stage at a time
//! (reader → synchronizer → buffer → publish loop) and is moved, never
//! cloned. Only the small [`PackageHeader`] is `Copy` so that statistics and
//! triggers can keep it after the package has been handed on.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

// ── Cycle framing ───────────────────────────────────────────────────────

/// Cycle framing flags carried in a package header.
///
/// The empty set means the package does not belong to any cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleState(u8);

impl CycleState {
    pub const NO_CYCLE: CycleState = CycleState(0);
    pub const START: CycleState = CycleState(0b001);
    pub const BODY: CycleState = CycleState(0b010);
    pub const END: CycleState = CycleState(0b100);

    const ALL: u8 = 0b111;

    /// Raw flag bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Build from raw bits, dropping unknown flags.
    pub const fn from_bits_truncate(bits: u8) -> Self {
        CycleState(bits & Self::ALL)
    }

    /// True if every flag in `other` is also set in `self`.
    pub const fn contains(self, other: CycleState) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_no_cycle(self) -> bool {
        self.0 == 0
    }

    pub const fn is_start(self) -> bool {
        self.0 & Self::START.0 != 0
    }

    pub const fn is_body(self) -> bool {
        self.0 & Self::BODY.0 != 0
    }

    pub const fn is_end(self) -> bool {
        self.0 & Self::END.0 != 0
    }

    /// Whether a package with these flags carries data worth republishing.
    ///
    /// Pure start/end framing packages carry no payload.
    pub const fn carries_payload(self) -> bool {
        self.is_no_cycle() || self.is_body()
    }
}

impl BitOr for CycleState {
    type Output = CycleState;

    fn bitor(self, rhs: CycleState) -> CycleState {
        CycleState(self.0 | rhs.0)
    }
}

impl BitOrAssign for CycleState {
    fn bitor_assign(&mut self, rhs: CycleState) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_no_cycle() {
            return write!(f, "no_cycle");
        }
        let mut parts = Vec::with_capacity(3);
        if self.is_start() {
            parts.push("start");
        }
        if self.is_body() {
            parts.push("body");
        }
        if self.is_end() {
            parts.push("end");
        }
        write!(f, "{}", parts.join("|"))
    }
}

// ── Header and metadata ─────────────────────────────────────────────────

/// Fixed-size package header. Timestamps are simulated microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageHeader {
    pub timestamp: u64,
    pub cycle_id: u32,
    pub cycle_state: CycleState,
}

impl PackageHeader {
    /// Header for a package outside any cycle.
    pub const fn new(timestamp: u64) -> Self {
        PackageHeader {
            timestamp,
            cycle_id: 0,
            cycle_state: CycleState::NO_CYCLE,
        }
    }

    /// Attach cycle framing.
    pub const fn with_cycle(mut self, cycle_id: u32, cycle_state: CycleState) -> Self {
        self.cycle_id = cycle_id;
        self.cycle_state = cycle_state;
        self
    }
}

/// Structured routing record attached by readers that know the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetaInfo {
    pub source_id: u16,
    pub instance_number: u32,
    pub cycle_id: u32,
    pub virtual_address: u64,
}

impl MetaInfo {
    /// Stable 64-bit hash used to route data triggers.
    ///
    /// Derived from SHA-256 so the value is identical across builds and
    /// platforms, unlike `std::hash`.
    pub fn routing_hash(&self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.source_id.to_le_bytes());
        hasher.update(self.instance_number.to_le_bytes());
        hasher.update(self.cycle_id.to_le_bytes());
        hasher.update(self.virtual_address.to_le_bytes());
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(prefix)
    }
}

/// Optional trigger-routing metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PackageMeta {
    #[default]
    None,
    /// Routed by package (signal) name.
    Name(String),
    /// Routed by the hash of a structured info record.
    Info(MetaInfo),
}

// ── Package ─────────────────────────────────────────────────────────────

/// One timestamped unit of recorded data.
#[derive(Debug)]
pub struct Package {
    header: PackageHeader,
    payload: Vec<u8>,
    meta: PackageMeta,
}

impl Package {
    pub fn new(header: PackageHeader, payload: Vec<u8>) -> Self {
        Package {
            header,
            payload,
            meta: PackageMeta::None,
        }
    }

    pub fn with_meta(mut self, meta: PackageMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn header(&self) -> PackageHeader {
        self.header
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn meta(&self) -> &PackageMeta {
        &self.meta
    }

    /// Whether the publish loop should put this package on the bus.
    pub fn has_payload(&self) -> bool {
        self.header.cycle_state.carries_payload()
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
