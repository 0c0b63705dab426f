//! In-process reader serving package streams registered by path.
//!
//! Used to embed the engine behind a custom data source and to drive the
//! pipeline in tests without files on disk.

use parking_lot::Mutex;
use rp_common::{
    CycleDescription, DataDescription, FileStats, Package, PackageHeader, PackageMeta,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{ReadItem, Reader, ReaderError, ReaderFactory};

/// One stored stream element.
#[derive(Debug, Clone)]
pub enum MemoryEntry {
    Package {
        header: PackageHeader,
        payload: Vec<u8>,
        meta: PackageMeta,
    },
    /// Reported to the synchronizer as an invalid package.
    Invalid(String),
}

/// A recording held in memory.
#[derive(Debug, Clone)]
pub struct MemoryRecording {
    pub device_name: String,
    pub entries: Vec<MemoryEntry>,
    pub cycle_descriptions: Vec<CycleDescription>,
    /// Entries handed out per `get_packages` call.
    pub batch_size: usize,
    pub fail_open: bool,
    /// Jumps to this exact target fail.
    pub fail_jump_at: Option<u64>,
}

impl MemoryRecording {
    pub fn new(device_name: impl Into<String>) -> Self {
        MemoryRecording {
            device_name: device_name.into(),
            entries: Vec::new(),
            cycle_descriptions: Vec::new(),
            batch_size: 4,
            fail_open: false,
            fail_jump_at: None,
        }
    }

    pub fn package(mut self, header: PackageHeader, payload: Vec<u8>) -> Self {
        self.entries.push(MemoryEntry::Package {
            header,
            payload,
            meta: PackageMeta::None,
        });
        self
    }

    pub fn named_package(
        mut self,
        header: PackageHeader,
        payload: Vec<u8>,
        name: impl Into<String>,
    ) -> Self {
        self.entries.push(MemoryEntry::Package {
            header,
            payload,
            meta: PackageMeta::Name(name.into()),
        });
        self
    }

    /// Append no-cycle packages at the given timestamps.
    pub fn packages_at(mut self, timestamps: &[u64], payload_len: usize) -> Self {
        for &ts in timestamps {
            self = self.package(PackageHeader::new(ts), vec![0u8; payload_len]);
        }
        self
    }

    pub fn invalid(mut self, reason: impl Into<String>) -> Self {
        self.entries.push(MemoryEntry::Invalid(reason.into()));
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_jump_to(mut self, timestamp: u64) -> Self {
        self.fail_jump_at = Some(timestamp);
        self
    }

    fn stats(&self) -> FileStats {
        self.entries
            .iter()
            .filter_map(|e| match e {
                MemoryEntry::Package {
                    header, payload, ..
                } => Some(FileStats {
                    start_timestamp: header.timestamp,
                    end_timestamp: header.timestamp,
                    total_size: payload.len() as u64,
                }),
                MemoryEntry::Invalid(_) => None,
            })
            .fold(FileStats::EMPTY, FileStats::merge)
    }
}

type Recordings = Arc<Mutex<HashMap<PathBuf, MemoryRecording>>>;
type JumpLog = Arc<Mutex<Vec<(PathBuf, u64)>>>;

/// Factory serving [`MemoryRecording`]s for one extension.
#[derive(Clone)]
pub struct MemoryReaderFactory {
    extension: String,
    recordings: Recordings,
    jumps: JumpLog,
}

impl MemoryReaderFactory {
    pub fn new(extension: impl Into<String>) -> Self {
        MemoryReaderFactory {
            extension: extension.into().to_ascii_lowercase(),
            recordings: Arc::default(),
            jumps: Arc::default(),
        }
    }

    /// Make `recording` openable under `path`.
    pub fn insert(&self, path: impl Into<PathBuf>, recording: MemoryRecording) {
        self.recordings.lock().insert(path.into(), recording);
    }

    /// Per-reader jump targets, in call order.
    pub fn jump_log(&self) -> Vec<(PathBuf, u64)> {
        self.jumps.lock().clone()
    }
}

impl ReaderFactory for MemoryReaderFactory {
    fn name(&self) -> &str {
        "memory"
    }

    fn supported_extensions(&self) -> Vec<String> {
        vec![self.extension.clone()]
    }

    fn create(&self) -> Box<dyn Reader> {
        Box::new(MemoryReader {
            recordings: Arc::clone(&self.recordings),
            jumps: Arc::clone(&self.jumps),
            path: None,
            recording: None,
            cursor: 0,
            filter: Vec::new(),
        })
    }
}

struct MemoryReader {
    recordings: Recordings,
    jumps: JumpLog,
    path: Option<PathBuf>,
    recording: Option<MemoryRecording>,
    cursor: usize,
    filter: Vec<String>,
}

impl MemoryReader {
    fn passes_filter(&self, meta: &PackageMeta) -> bool {
        match meta {
            PackageMeta::Name(name) if !self.filter.is_empty() => {
                self.filter.iter().any(|f| f == name)
            }
            _ => true,
        }
    }
}

impl Reader for MemoryReader {
    fn open(&mut self, path: &Path) -> Result<(), ReaderError> {
        let recording = self
            .recordings
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| ReaderError::Open {
                path: path.to_path_buf(),
                reason: "no such in-memory recording".to_string(),
            })?;
        if recording.fail_open {
            return Err(ReaderError::Open {
                path: path.to_path_buf(),
                reason: "recording marked unreadable".to_string(),
            });
        }
        self.path = Some(path.to_path_buf());
        self.recording = Some(recording);
        self.cursor = 0;
        Ok(())
    }

    fn get_packages(&mut self) -> Vec<ReadItem> {
        let Some(recording) = &self.recording else {
            return Vec::new();
        };
        let end = (self.cursor + recording.batch_size).min(recording.entries.len());
        let slice = recording.entries[self.cursor..end].to_vec();
        self.cursor = end;

        slice
            .into_iter()
            .filter_map(|entry| match entry {
                MemoryEntry::Package {
                    header,
                    payload,
                    meta,
                } => self
                    .passes_filter(&meta)
                    .then(|| Ok(Package::new(header, payload).with_meta(meta))),
                MemoryEntry::Invalid(reason) => Some(Err(ReaderError::InvalidPackage(reason))),
            })
            .collect()
    }

    fn file_stats(&self) -> FileStats {
        self.recording
            .as_ref()
            .map(MemoryRecording::stats)
            .unwrap_or(FileStats::EMPTY)
    }

    fn data_descriptions(&self) -> Vec<DataDescription> {
        self.recording
            .iter()
            .map(|r| DataDescription {
                device_name: r.device_name.clone(),
                source_id: 0,
                instance_number: 0,
                format: "memory".to_string(),
            })
            .collect()
    }

    fn cycle_descriptions(&self) -> Vec<CycleDescription> {
        self.recording
            .as_ref()
            .map(|r| r.cycle_descriptions.clone())
            .unwrap_or_default()
    }

    fn check_end_of_file(&self) -> bool {
        self.recording
            .as_ref()
            .map(|r| self.cursor >= r.entries.len())
            .unwrap_or(true)
    }

    fn jump_to(&mut self, timestamp: u64) -> Result<(), ReaderError> {
        let recording = self.recording.as_ref().ok_or(ReaderError::NotOpen)?;
        if recording.fail_jump_at == Some(timestamp) {
            return Err(ReaderError::Jump {
                timestamp,
                reason: "seek marked failing".to_string(),
            });
        }
        self.cursor = recording
            .entries
            .iter()
            .position(|e| {
                matches!(e, MemoryEntry::Package { header, .. } if header.timestamp >= timestamp)
            })
            .unwrap_or(recording.entries.len());
        if let Some(path) = &self.path {
            self.jumps.lock().push((path.clone(), timestamp));
        }
        Ok(())
    }

    fn supports_filter(&self) -> bool {
        true
    }

    fn set_filter(&mut self, expression: &str) -> Result<(), ReaderError> {
        self.filter = expression
            .split(" OR ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        Ok(())
    }

    fn reset(&mut self) -> Result<(), ReaderError> {
        self.path = None;
        self.recording = None;
        self.cursor = 0;
        self.filter.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(factory: &MemoryReaderFactory, path: &str) -> Box<dyn Reader> {
        let mut reader = factory.create();
        reader.open(Path::new(path)).unwrap();
        reader
    }

    #[test]
    fn test_batches_and_eof() {
        let factory = MemoryReaderFactory::new("mem");
        factory.insert(
            "a.mem",
            MemoryRecording::new("cam")
                .packages_at(&[1, 2, 3], 8)
                .batch_size(2),
        );
        let mut reader = open(&factory, "a.mem");
        assert_eq!(reader.get_packages().len(), 2);
        assert!(!reader.check_end_of_file());
        assert_eq!(reader.get_packages().len(), 1);
        assert!(reader.check_end_of_file());
        assert!(reader.get_packages().is_empty());
    }

    #[test]
    fn test_stats_and_jump() {
        let factory = MemoryReaderFactory::new("mem");
        factory.insert("a.mem", MemoryRecording::new("cam").packages_at(&[10, 20, 30], 4));
        let mut reader = open(&factory, "a.mem");
        let stats = reader.file_stats();
        assert_eq!((stats.start_timestamp, stats.end_timestamp, stats.total_size), (10, 30, 12));

        reader.jump_to(15).unwrap();
        let first = reader.get_packages().remove(0).unwrap();
        assert_eq!(first.timestamp(), 20);
        assert_eq!(factory.jump_log(), vec![(PathBuf::from("a.mem"), 15)]);
    }

    #[test]
    fn test_open_failures() {
        let factory = MemoryReaderFactory::new("mem");
        factory.insert("bad.mem", MemoryRecording::new("cam").failing_open());
        let mut reader = factory.create();
        assert!(reader.open(Path::new("bad.mem")).is_err());
        assert!(reader.open(Path::new("missing.mem")).is_err());
        assert!(reader.check_end_of_file());
    }

    #[test]
    fn test_filter_by_name() {
        let factory = MemoryReaderFactory::new("mem");
        factory.insert(
            "a.mem",
            MemoryRecording::new("cam")
                .named_package(PackageHeader::new(1), vec![1], "radar")
                .named_package(PackageHeader::new(2), vec![2], "camera")
                .batch_size(8),
        );
        let mut reader = open(&factory, "a.mem");
        reader.set_filter("camera OR lidar").unwrap();
        let batch = reader.get_packages();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].as_ref().unwrap().timestamp(), 2);
    }
}
