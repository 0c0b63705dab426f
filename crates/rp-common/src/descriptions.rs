//! Recording metadata reported by readers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Time range and size of one file, or of all open files combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FileStats {
    pub start_timestamp: u64,
    pub end_timestamp: u64,
    pub total_size: u64,
}

impl FileStats {
    /// Identity element for [`FileStats::merge`].
    pub const EMPTY: FileStats = FileStats {
        start_timestamp: u64::MAX,
        end_timestamp: 0,
        total_size: 0,
    };

    /// Combine two ranges: min start, max end, summed size.
    pub fn merge(self, other: FileStats) -> FileStats {
        FileStats {
            start_timestamp: self.start_timestamp.min(other.start_timestamp),
            end_timestamp: self.end_timestamp.max(other.end_timestamp),
            total_size: self.total_size.saturating_add(other.total_size),
        }
    }

    /// True once at least one real range has been merged in.
    pub fn is_valid(&self) -> bool {
        self.start_timestamp <= self.end_timestamp
    }

    /// Clamp a timestamp into `[start, end]`.
    pub fn clamp(&self, timestamp: u64) -> u64 {
        if !self.is_valid() {
            return timestamp;
        }
        timestamp.clamp(self.start_timestamp, self.end_timestamp)
    }

    pub fn duration(&self) -> u64 {
        self.end_timestamp.saturating_sub(self.start_timestamp)
    }
}

impl Default for FileStats {
    fn default() -> Self {
        FileStats::EMPTY
    }
}

/// Description of one data source inside a recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DataDescription {
    pub device_name: String,
    pub source_id: u16,
    pub instance_number: u32,
    /// Free-form format tag supplied by the reader.
    #[serde(default)]
    pub format: String,
}

/// Description of one cycle identity inside a recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CycleDescription {
    pub cycle_id: u32,
    pub device_name: String,
    #[serde(default)]
    pub description: String,
}
