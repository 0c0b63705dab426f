//! K-way merge of all open readers into one time-ordered stream.

use rp_common::{CycleDescription, DataDescription, FileStats, Package};
use rp_config::{keys, ConfigStore};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{Reader, ReaderError, ReaderRegistry};

const DEFAULT_MAX_OPEN_FILES: u64 = 20;
const DEFAULT_INVALID_PACKAGE_RETRIES: u64 = 1;

/// Reasons an open request is rejected.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("no recording files given")]
    NoFiles,

    #[error("too many recording files: {requested} requested, at most {max} allowed")]
    TooManyFiles { requested: usize, max: usize },

    #[error("recording file has no extension: {}", path.display())]
    NoExtension { path: PathBuf },

    #[error("no reader for .{extension} files: {}", path.display())]
    Unsupported { path: PathBuf, extension: String },

    #[error("reader failed for {}: {source}", path.display())]
    Reader {
        path: PathBuf,
        #[source]
        source: ReaderError,
    },

    #[error("device {device} appears in {} and {}", first.display(), second.display())]
    DuplicateDevice {
        device: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("initial positioning at {timestamp} failed: {source}")]
    InitialJump {
        timestamp: u64,
        #[source]
        source: ReaderError,
    },
}

impl From<OpenError> for rp_common::Error {
    fn from(err: OpenError) -> Self {
        match err {
            OpenError::NoFiles => rp_common::Error::NoFiles,
            OpenError::TooManyFiles { requested, max } => {
                rp_common::Error::TooManyFiles { requested, max }
            }
            OpenError::NoExtension { path } | OpenError::Unsupported { path, .. } => {
                rp_common::Error::UnsupportedFile {
                    path: path.display().to_string(),
                }
            }
            OpenError::Reader { path, source } => rp_common::Error::ReaderOpen {
                path: path.display().to_string(),
                reason: source.to_string(),
            },
            OpenError::DuplicateDevice { device, .. } => {
                rp_common::Error::DuplicateDevice { device }
            }
            OpenError::InitialJump { timestamp, source } => rp_common::Error::JumpFailed {
                timestamp,
                reason: source.to_string(),
            },
        }
    }
}

struct ReaderSlot {
    path: PathBuf,
    reader: Box<dyn Reader>,
    stats: FileStats,
    /// Packages pulled from the reader but not yet delivered.
    pending: VecDeque<Package>,
}

impl ReaderSlot {
    fn head_timestamp(&self) -> Option<u64> {
        self.pending.front().map(Package::timestamp)
    }

    fn exhausted(&self) -> bool {
        self.pending.is_empty() && self.reader.check_end_of_file()
    }

    /// Pull batches until a package is pending, the reader reports end of
    /// file, or `attempts` batches came back empty.
    fn refill(&mut self, attempts: u64) {
        for _ in 0..attempts {
            if !self.pending.is_empty() || self.reader.check_end_of_file() {
                return;
            }
            for item in self.reader.get_packages() {
                match item {
                    Ok(package) => self.pending.push_back(package),
                    Err(err) => warn!(
                        path = %self.path.display(),
                        error = %err,
                        "dropping invalid package"
                    ),
                }
            }
        }
    }
}

/// Owns one reader per open file and hands out packages in global
/// timestamp order.
pub struct ReaderSynchronizer {
    config: Arc<dyn ConfigStore>,
    registry: Arc<ReaderRegistry>,
    slots: Vec<ReaderSlot>,
    stats: FileStats,
    /// Last jump target while nothing has been delivered since.
    position: Option<u64>,
}

impl ReaderSynchronizer {
    pub fn new(config: Arc<dyn ConfigStore>, registry: Arc<ReaderRegistry>) -> Self {
        ReaderSynchronizer {
            config,
            registry,
            slots: Vec::new(),
            stats: FileStats::EMPTY,
            position: None,
        }
    }

    pub fn open(&mut self, paths: &[PathBuf]) -> Result<(), OpenError> {
        self.open_with_progress(paths, |_, _, _| {})
    }

    /// Open every file, reporting `(current, total, path)` before each one.
    ///
    /// On failure every reader opened so far is released again.
    pub fn open_with_progress<F>(&mut self, paths: &[PathBuf], progress: F) -> Result<(), OpenError>
    where
        F: FnMut(u32, u32, &Path),
    {
        if self.is_open() {
            self.reset();
        }
        let result = self.open_all(paths, progress);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn open_all<F>(&mut self, paths: &[PathBuf], mut progress: F) -> Result<(), OpenError>
    where
        F: FnMut(u32, u32, &Path),
    {
        if paths.is_empty() {
            return Err(OpenError::NoFiles);
        }
        let max = self
            .config
            .get_uint(keys::MAX_OPEN_FILES, DEFAULT_MAX_OPEN_FILES) as usize;
        if paths.len() > max {
            return Err(OpenError::TooManyFiles {
                requested: paths.len(),
                max,
            });
        }

        let filter = self.combined_filter();
        let total = paths.len() as u32;
        for (index, path) in paths.iter().enumerate() {
            progress(index as u32 + 1, total, path);
            let mut reader = self.registry.reader_for_path(path)?;
            reader.open(path).map_err(|source| OpenError::Reader {
                path: path.clone(),
                source,
            })?;
            if let Some(expr) = &filter {
                if reader.supports_filter() {
                    if let Err(err) = reader.set_filter(expr) {
                        warn!(path = %path.display(), error = %err, "filter rejected by reader");
                    }
                }
            }
            let stats = reader.file_stats();
            debug!(
                path = %path.display(),
                start = stats.start_timestamp,
                end = stats.end_timestamp,
                "opened reader"
            );
            self.slots.push(ReaderSlot {
                path: path.clone(),
                reader,
                stats,
                pending: VecDeque::new(),
            });
        }

        if self
            .config
            .get_bool(keys::CHECK_DUPLICATE_DEVICE_NAMES, false)
        {
            self.check_duplicate_devices()?;
        }

        self.stats = self
            .slots
            .iter()
            .map(|s| s.stats)
            .fold(FileStats::EMPTY, FileStats::merge);
        let start = if self.stats.is_valid() {
            self.stats.start_timestamp
        } else {
            0
        };
        self.jump_to(start)
            .map_err(|source| OpenError::InitialJump {
                timestamp: start,
                source,
            })?;
        info!(
            files = self.slots.len(),
            start = self.stats.start_timestamp,
            end = self.stats.end_timestamp,
            "recording opened"
        );
        Ok(())
    }

    fn combined_filter(&self) -> Option<String> {
        let expressions: Vec<String> = self
            .config
            .get_string_list(keys::FILTER_EXPRESSIONS)
            .into_iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        (!expressions.is_empty()).then(|| expressions.join(" OR "))
    }

    fn check_duplicate_devices(&self) -> Result<(), OpenError> {
        let mut seen: HashMap<String, usize> = HashMap::new();
        for (index, slot) in self.slots.iter().enumerate() {
            for desc in slot.reader.data_descriptions() {
                match seen.get(&desc.device_name) {
                    Some(&first) if first != index => {
                        return Err(OpenError::DuplicateDevice {
                            device: desc.device_name,
                            first: self.slots[first].path.clone(),
                            second: slot.path.clone(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        seen.insert(desc.device_name, index);
                    }
                }
            }
        }
        Ok(())
    }

    /// Deliver the globally earliest pending package.
    ///
    /// An empty result with [`ReaderSynchronizer::end_of_file`] false only
    /// means no reader produced data this round.
    pub fn next_packages(&mut self) -> Vec<Package> {
        let retries = self
            .config
            .get_uint(keys::INVALID_PACKAGE_RETRIES, DEFAULT_INVALID_PACKAGE_RETRIES);
        for slot in &mut self.slots {
            slot.refill(retries.saturating_add(1));
        }

        let mut best: Option<(usize, u64)> = None;
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(ts) = slot.head_timestamp() {
                // Strict comparison keeps ties with the earlier reader.
                if best.map_or(true, |(_, best_ts)| ts < best_ts) {
                    best = Some((index, ts));
                }
            }
        }

        match best.and_then(|(index, _)| self.slots[index].pending.pop_front()) {
            Some(package) => {
                self.position = None;
                vec![package]
            }
            None => Vec::new(),
        }
    }

    /// True once every reader is drained. Vacuously true with no readers.
    pub fn end_of_file(&self) -> bool {
        self.slots.iter().all(ReaderSlot::exhausted)
    }

    /// Reposition every reader at `timestamp`, clamped into its own range.
    ///
    /// All readers are attempted; the first failure is returned.
    pub fn jump_to(&mut self, timestamp: u64) -> Result<(), ReaderError> {
        if self.position == Some(timestamp) {
            debug!(timestamp, "already positioned, skipping jump");
            return Ok(());
        }
        let mut first_error = None;
        for slot in &mut self.slots {
            let target = slot.stats.clamp(timestamp);
            slot.pending.clear();
            if let Err(err) = slot.reader.jump_to(target) {
                warn!(path = %slot.path.display(), target, error = %err, "reader jump failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => {
                self.position = None;
                Err(err)
            }
            None => {
                self.position = Some(timestamp);
                Ok(())
            }
        }
    }

    /// Release all readers and forget the recording.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            if let Err(err) = slot.reader.reset() {
                warn!(path = %slot.path.display(), error = %err, "reader reset failed");
            }
        }
        self.slots.clear();
        self.stats = FileStats::EMPTY;
        self.position = None;
    }

    pub fn is_open(&self) -> bool {
        !self.slots.is_empty()
    }

    pub fn reader_count(&self) -> usize {
        self.slots.len()
    }

    pub fn file_stats(&self) -> FileStats {
        self.stats
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.slots.iter().map(|s| s.path.clone()).collect()
    }

    pub fn data_descriptions(&self) -> Vec<DataDescription> {
        self.slots
            .iter()
            .flat_map(|s| s.reader.data_descriptions())
            .collect()
    }

    pub fn cycle_descriptions(&self) -> Vec<CycleDescription> {
        self.slots
            .iter()
            .flat_map(|s| s.reader.cycle_descriptions())
            .collect()
    }
}

impl std::fmt::Debug for ReaderSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderSynchronizer")
            .field("paths", &self.paths())
            .field("stats", &self.stats)
            .field("position", &self.position)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{MemoryReaderFactory, MemoryRecording};
    use rp_config::PlayerConfig;

    fn setup(config: PlayerConfig) -> (MemoryReaderFactory, ReaderSynchronizer) {
        let factory = MemoryReaderFactory::new("mem");
        let mut registry = ReaderRegistry::new();
        registry.register(Arc::new(factory.clone())).unwrap();
        let sync = ReaderSynchronizer::new(Arc::new(config), Arc::new(registry));
        (factory, sync)
    }

    fn drain(sync: &mut ReaderSynchronizer) -> Vec<u64> {
        let mut out = Vec::new();
        while !sync.end_of_file() {
            out.extend(sync.next_packages().iter().map(Package::timestamp));
        }
        out
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_merges_in_timestamp_order() {
        let (factory, mut sync) = setup(PlayerConfig::default());
        factory.insert("a.mem", MemoryRecording::new("a").packages_at(&[1, 4, 9], 1));
        factory.insert("b.mem", MemoryRecording::new("b").packages_at(&[2, 3, 10], 1));
        factory.insert("c.mem", MemoryRecording::new("c").packages_at(&[5], 1));
        sync.open(&paths(&["a.mem", "b.mem", "c.mem"])).unwrap();

        assert_eq!(sync.file_stats().start_timestamp, 1);
        assert_eq!(sync.file_stats().end_timestamp, 10);
        assert_eq!(drain(&mut sync), vec![1, 2, 3, 4, 5, 9, 10]);
        assert!(sync.next_packages().is_empty());
    }

    #[test]
    fn test_ties_prefer_first_reader() {
        let (factory, mut sync) = setup(PlayerConfig::default());
        factory.insert("a.mem", MemoryRecording::new("a").packages_at(&[5], 1));
        factory.insert("b.mem", MemoryRecording::new("b").packages_at(&[5], 2));
        sync.open(&paths(&["a.mem", "b.mem"])).unwrap();

        let first = sync.next_packages().remove(0);
        let second = sync.next_packages().remove(0);
        assert_eq!((first.size(), second.size()), (1, 2));
    }

    #[test]
    fn test_no_files_and_too_many() {
        let mut config = PlayerConfig::default();
        config.readers.max_open_files = 2;
        let (factory, mut sync) = setup(config);
        for name in ["a.mem", "b.mem", "c.mem"] {
            factory.insert(name, MemoryRecording::new(name).packages_at(&[1], 1));
        }
        assert!(matches!(sync.open(&[]), Err(OpenError::NoFiles)));
        assert!(matches!(
            sync.open(&paths(&["a.mem", "b.mem", "c.mem"])),
            Err(OpenError::TooManyFiles { requested: 3, max: 2 })
        ));
        assert!(!sync.is_open());
        assert!(sync.end_of_file());
    }

    #[test]
    fn test_failed_open_releases_readers() {
        let (factory, mut sync) = setup(PlayerConfig::default());
        factory.insert("a.mem", MemoryRecording::new("a").packages_at(&[1], 1));
        factory.insert("b.mem", MemoryRecording::new("b").failing_open());
        let err = sync.open(&paths(&["a.mem", "b.mem"])).unwrap_err();
        assert!(matches!(err, OpenError::Reader { .. }));
        assert!(!sync.is_open());

        let err = sync.open(&paths(&["a.unknown"])).unwrap_err();
        assert!(matches!(err, OpenError::Unsupported { .. }));
        let common: rp_common::Error = err.into();
        assert_eq!(common.code(), 21);
    }

    #[test]
    fn test_duplicate_device_check_is_opt_in() {
        let (factory, mut sync) = setup(PlayerConfig::default());
        factory.insert("a.mem", MemoryRecording::new("cam").packages_at(&[1], 1));
        factory.insert("b.mem", MemoryRecording::new("cam").packages_at(&[2], 1));
        sync.open(&paths(&["a.mem", "b.mem"])).unwrap();

        let mut config = PlayerConfig::default();
        config.readers.check_duplicate_device_names = true;
        let (factory, mut sync) = setup(config);
        factory.insert("a.mem", MemoryRecording::new("cam").packages_at(&[1], 1));
        factory.insert("b.mem", MemoryRecording::new("cam").packages_at(&[2], 1));
        match sync.open(&paths(&["a.mem", "b.mem"])) {
            Err(OpenError::DuplicateDevice { device, .. }) => assert_eq!(device, "cam"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_packages_are_skipped() {
        let (factory, mut sync) = setup(PlayerConfig::default());
        factory.insert(
            "a.mem",
            MemoryRecording::new("a")
                .packages_at(&[1], 1)
                .invalid("corrupt")
                .packages_at(&[3], 1)
                .batch_size(1),
        );
        sync.open(&paths(&["a.mem"])).unwrap();
        assert_eq!(drain(&mut sync), vec![1, 3]);
    }

    #[test]
    fn test_jump_clamps_per_reader() {
        let (factory, mut sync) = setup(PlayerConfig::default());
        factory.insert("a.mem", MemoryRecording::new("a").packages_at(&[10, 20, 30], 1));
        factory.insert("b.mem", MemoryRecording::new("b").packages_at(&[50, 60], 1));
        sync.open(&paths(&["a.mem", "b.mem"])).unwrap();

        sync.jump_to(40).unwrap();
        let log = factory.jump_log();
        // Initial positioning at the recording start, then the real jump.
        assert_eq!(log[0], (PathBuf::from("a.mem"), 10));
        assert_eq!(log[1], (PathBuf::from("b.mem"), 50));
        assert_eq!(log[2], (PathBuf::from("a.mem"), 30));
        assert_eq!(log[3], (PathBuf::from("b.mem"), 50));
        assert_eq!(drain(&mut sync), vec![30, 50, 60]);
    }

    #[test]
    fn test_repeated_jump_without_reads_is_skipped() {
        let (factory, mut sync) = setup(PlayerConfig::default());
        factory.insert("a.mem", MemoryRecording::new("a").packages_at(&[10, 20], 1));
        sync.open(&paths(&["a.mem"])).unwrap();
        sync.jump_to(20).unwrap();
        sync.jump_to(20).unwrap();
        assert_eq!(factory.jump_log().len(), 2);

        sync.next_packages();
        sync.jump_to(20).unwrap();
        assert_eq!(factory.jump_log().len(), 3);
    }

    #[test]
    fn test_filter_and_progress() {
        let mut config = PlayerConfig::default();
        config.filters.expressions = vec!["camera".into(), "lidar".into()];
        let (factory, mut sync) = setup(config);
        factory.insert(
            "a.mem",
            MemoryRecording::new("a")
                .named_package(rp_common::PackageHeader::new(1), vec![0], "radar")
                .named_package(rp_common::PackageHeader::new(2), vec![0], "lidar"),
        );
        factory.insert("b.mem", MemoryRecording::new("b").packages_at(&[3], 1));

        let mut seen = Vec::new();
        sync.open_with_progress(&paths(&["a.mem", "b.mem"]), |current, total, path| {
            seen.push((current, total, path.to_path_buf()));
        })
        .unwrap();
        assert_eq!(
            seen,
            vec![(1, 2, PathBuf::from("a.mem")), (2, 2, PathBuf::from("b.mem"))]
        );
        assert_eq!(drain(&mut sync), vec![2, 3]);
    }

    #[test]
    fn test_reopen_replaces_previous_recording() {
        let (factory, mut sync) = setup(PlayerConfig::default());
        factory.insert("a.mem", MemoryRecording::new("a").packages_at(&[1], 1));
        factory.insert("b.mem", MemoryRecording::new("b").packages_at(&[7, 8], 1));
        sync.open(&paths(&["a.mem"])).unwrap();
        sync.open(&paths(&["b.mem"])).unwrap();
        assert_eq!(sync.reader_count(), 1);
        assert_eq!(sync.paths(), paths(&["b.mem"]));
        assert_eq!(drain(&mut sync), vec![7, 8]);

        sync.reset();
        assert!(!sync.is_open());
        assert!(!sync.file_stats().is_valid());
    }
}
