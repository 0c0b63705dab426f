//! Synthetic scenario reader.
//!
//! A `.rpscn` file is a small TOML document describing one periodic stream,
//! for demos and pipeline smoke tests without real recordings:
//!
//! ```toml
//! device = "front_camera"
//! signal = "camera.image"
//! start_us = 0
//! period_us = 33333
//! count = 300
//! payload_bytes = 1024
//! cycle_id = 10        # optional: frame every tick as start/body/end
//! ```
//!
//! Packages are generated lazily in batches; nothing is materialized up
//! front.

use rp_common::{
    CycleDescription, CycleState, DataDescription, FileStats, MetaInfo, Package, PackageHeader,
    PackageMeta,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{ReadItem, Reader, ReaderError, ReaderFactory};

/// File extension served by [`ScenarioReaderFactory`].
pub const SCENARIO_EXTENSION: &str = "rpscn";

/// Description of one synthetic stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioSpec {
    pub device: String,
    #[serde(default)]
    pub source_id: u16,
    #[serde(default)]
    pub instance_number: u32,
    /// Signal name used for data triggers and filters.
    #[serde(default)]
    pub signal: Option<String>,
    #[serde(default)]
    pub start_us: u64,
    pub period_us: u64,
    pub count: u64,
    #[serde(default = "default_payload_bytes")]
    pub payload_bytes: usize,
    #[serde(default)]
    pub cycle_id: Option<u32>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_payload_bytes() -> usize {
    64
}

fn default_batch_size() -> usize {
    16
}

impl ScenarioSpec {
    pub fn from_toml(text: &str) -> Result<Self, String> {
        let spec: ScenarioSpec = toml::from_str(text).map_err(|e| e.to_string())?;
        if spec.count > 1 && spec.period_us == 0 {
            return Err("period_us must be positive when count > 1".to_string());
        }
        if spec.device.trim().is_empty() {
            return Err("device must not be empty".to_string());
        }
        Ok(spec)
    }

    fn tick_timestamp(&self, tick: u64) -> u64 {
        self.start_us
            .saturating_add(tick.saturating_mul(self.period_us))
    }

    fn phases_per_tick(&self) -> u8 {
        if self.cycle_id.is_some() {
            3
        } else {
            1
        }
    }

    fn stats(&self) -> FileStats {
        if self.count == 0 {
            return FileStats::EMPTY;
        }
        FileStats {
            start_timestamp: self.start_us,
            end_timestamp: self.tick_timestamp(self.count - 1),
            total_size: self.count.saturating_mul(self.payload_bytes as u64),
        }
    }
}

/// Factory for `.rpscn` scenario files.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScenarioReaderFactory;

impl ReaderFactory for ScenarioReaderFactory {
    fn name(&self) -> &str {
        "scenario"
    }

    fn supported_extensions(&self) -> Vec<String> {
        vec![SCENARIO_EXTENSION.to_string()]
    }

    fn create(&self) -> Box<dyn Reader> {
        Box::<ScenarioReader>::default()
    }
}

#[derive(Debug, Default)]
struct ScenarioReader {
    spec: Option<ScenarioSpec>,
    tick: u64,
    phase: u8,
    filtered_out: bool,
}

impl ScenarioReader {
    fn next_package(&mut self, spec: &ScenarioSpec) -> Package {
        let ts = spec.tick_timestamp(self.tick);
        let (state, payload) = match (spec.cycle_id, self.phase) {
            (None, _) => (CycleState::NO_CYCLE, true),
            (Some(_), 0) => (CycleState::START, false),
            (Some(_), 1) => (CycleState::BODY, true),
            (Some(_), _) => (CycleState::END, false),
        };
        let header = PackageHeader::new(ts).with_cycle(spec.cycle_id.unwrap_or(0), state);
        let bytes = if payload {
            vec![(self.tick & 0xff) as u8; spec.payload_bytes]
        } else {
            Vec::new()
        };
        let meta = match &spec.signal {
            Some(name) => PackageMeta::Name(name.clone()),
            None => PackageMeta::Info(MetaInfo {
                source_id: spec.source_id,
                instance_number: spec.instance_number,
                cycle_id: spec.cycle_id.unwrap_or(0),
                virtual_address: 0,
            }),
        };

        self.phase += 1;
        if self.phase >= spec.phases_per_tick() {
            self.phase = 0;
            self.tick += 1;
        }
        Package::new(header, bytes).with_meta(meta)
    }
}

impl Reader for ScenarioReader {
    fn open(&mut self, path: &Path) -> Result<(), ReaderError> {
        let text = std::fs::read_to_string(path).map_err(|e| ReaderError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let spec = ScenarioSpec::from_toml(&text).map_err(|reason| ReaderError::Open {
            path: path.to_path_buf(),
            reason,
        })?;
        *self = ScenarioReader {
            spec: Some(spec),
            ..Default::default()
        };
        Ok(())
    }

    fn get_packages(&mut self) -> Vec<ReadItem> {
        let Some(spec) = self.spec.clone() else {
            return Vec::new();
        };
        let mut batch = Vec::with_capacity(spec.batch_size);
        while batch.len() < spec.batch_size.max(1) && !self.check_end_of_file() {
            batch.push(Ok(self.next_package(&spec)));
        }
        batch
    }

    fn file_stats(&self) -> FileStats {
        self.spec
            .as_ref()
            .map(ScenarioSpec::stats)
            .unwrap_or(FileStats::EMPTY)
    }

    fn data_descriptions(&self) -> Vec<DataDescription> {
        self.spec
            .iter()
            .map(|s| DataDescription {
                device_name: s.device.clone(),
                source_id: s.source_id,
                instance_number: s.instance_number,
                format: "scenario".to_string(),
            })
            .collect()
    }

    fn cycle_descriptions(&self) -> Vec<CycleDescription> {
        self.spec
            .iter()
            .filter_map(|s| {
                s.cycle_id.map(|cycle_id| CycleDescription {
                    cycle_id,
                    device_name: s.device.clone(),
                    description: format!("synthetic cycle, period {}us", s.period_us),
                })
            })
            .collect()
    }

    fn check_end_of_file(&self) -> bool {
        match &self.spec {
            Some(spec) => self.filtered_out || self.tick >= spec.count,
            None => true,
        }
    }

    fn jump_to(&mut self, timestamp: u64) -> Result<(), ReaderError> {
        let spec = self.spec.as_ref().ok_or(ReaderError::NotOpen)?;
        let offset = timestamp.saturating_sub(spec.start_us);
        let tick = if spec.period_us == 0 {
            0
        } else {
            offset.div_ceil(spec.period_us)
        };
        self.tick = tick.min(spec.count);
        self.phase = 0;
        Ok(())
    }

    fn supports_filter(&self) -> bool {
        true
    }

    /// Keep the stream only if one OR-term names its device or signal.
    fn set_filter(&mut self, expression: &str) -> Result<(), ReaderError> {
        let spec = self.spec.as_ref().ok_or(ReaderError::NotOpen)?;
        let terms: Vec<&str> = expression
            .split(" OR ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return Err(ReaderError::Filter {
                expression: expression.to_string(),
                reason: "empty expression".to_string(),
            });
        }
        self.filtered_out = !terms
            .iter()
            .any(|t| *t == "*" || *t == spec.device || Some(*t) == spec.signal.as_deref());
        Ok(())
    }

    fn reset(&mut self) -> Result<(), ReaderError> {
        *self = ScenarioReader::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_scenario(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    fn drain(reader: &mut dyn Reader) -> Vec<Package> {
        let mut out = Vec::new();
        while !reader.check_end_of_file() {
            out.extend(reader.get_packages().into_iter().map(|r| r.unwrap()));
        }
        out
    }

    #[test]
    fn test_plain_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scenario(
            &dir,
            "cam.rpscn",
            "device = \"cam\"\nstart_us = 100\nperiod_us = 10\ncount = 5\npayload_bytes = 3\nbatch_size = 2\n",
        );
        let mut reader = ScenarioReaderFactory.create();
        reader.open(&path).unwrap();
        let stats = reader.file_stats();
        assert_eq!((stats.start_timestamp, stats.end_timestamp, stats.total_size), (100, 140, 15));

        let packages = drain(reader.as_mut());
        let ts: Vec<u64> = packages.iter().map(|p| p.timestamp()).collect();
        assert_eq!(ts, vec![100, 110, 120, 130, 140]);
        assert!(packages.iter().all(|p| p.size() == 3 && p.has_payload()));
    }

    #[test]
    fn test_cycle_framing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scenario(
            &dir,
            "radar.rpscn",
            "device = \"radar\"\nperiod_us = 50\ncount = 2\ncycle_id = 7\n",
        );
        let mut reader = ScenarioReaderFactory.create();
        reader.open(&path).unwrap();
        let packages = drain(reader.as_mut());
        let states: Vec<CycleState> = packages.iter().map(|p| p.header().cycle_state).collect();
        assert_eq!(
            states,
            vec![
                CycleState::START,
                CycleState::BODY,
                CycleState::END,
                CycleState::START,
                CycleState::BODY,
                CycleState::END
            ]
        );
        assert!(packages.iter().all(|p| p.header().cycle_id == 7));
        assert_eq!(reader.cycle_descriptions()[0].cycle_id, 7);
    }

    #[test]
    fn test_jump_rounds_up_to_next_tick() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scenario(&dir, "a.rpscn", "device = \"a\"\nperiod_us = 10\ncount = 10\n");
        let mut reader = ScenarioReaderFactory.create();
        reader.open(&path).unwrap();
        reader.jump_to(35).unwrap();
        assert_eq!(reader.get_packages()[0].as_ref().unwrap().timestamp(), 40);
        reader.jump_to(u64::MAX).unwrap();
        assert!(reader.check_end_of_file());
    }

    #[test]
    fn test_filter_excludes_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scenario(
            &dir,
            "a.rpscn",
            "device = \"a\"\nsignal = \"a.sig\"\nperiod_us = 10\ncount = 3\n",
        );
        let mut reader = ScenarioReaderFactory.create();
        reader.open(&path).unwrap();
        reader.set_filter("b OR a.sig").unwrap();
        assert!(!reader.check_end_of_file());
        reader.set_filter("b").unwrap();
        assert!(reader.check_end_of_file());
        assert!(reader.set_filter("  ").is_err());
    }

    #[test]
    fn test_rejects_bad_spec() {
        assert!(ScenarioSpec::from_toml("device = \"a\"\nperiod_us = 0\ncount = 2\n").is_err());
        assert!(ScenarioSpec::from_toml("device = \"a\"\nperiod_us = 1\ncount = 2\nbogus = 1\n").is_err());
    }
}
