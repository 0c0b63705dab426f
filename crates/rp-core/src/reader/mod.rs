//! Recording readers and the multi-reader synchronizer.
//!
//! A [`Reader`] turns one recording file into a locally time-ordered stream
//! of packages. Readers are created per file by a [`ReaderFactory`] chosen
//! from the [`ReaderRegistry`] by file extension. The
//! [`ReaderSynchronizer`] merges all open readers into one global stream.

pub mod memory;
pub mod scenario;
pub mod synchronizer;

use rp_common::{CycleDescription, DataDescription, FileStats, Package};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub use memory::{MemoryEntry, MemoryReaderFactory, MemoryRecording};
pub use scenario::{ScenarioReaderFactory, ScenarioSpec, SCENARIO_EXTENSION};
pub use synchronizer::{OpenError, ReaderSynchronizer};

/// Errors reported by reader implementations.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("cannot open {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    #[error("reader is not open")]
    NotOpen,

    #[error("invalid package: {0}")]
    InvalidPackage(String),

    #[error("jump to {timestamp} failed: {reason}")]
    Jump { timestamp: u64, reason: String },

    #[error("filter not supported")]
    FilterUnsupported,

    #[error("invalid filter expression '{expression}': {reason}")]
    Filter { expression: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One item of a reader batch. Invalid packages are reported, not fatal.
pub type ReadItem = Result<Package, ReaderError>;

/// Contract for per-format recording readers.
///
/// Packages returned by successive [`Reader::get_packages`] calls must be in
/// non-decreasing timestamp order.
pub trait Reader: Send {
    fn open(&mut self, path: &Path) -> Result<(), ReaderError>;

    /// Next batch of packages. An empty batch does not imply end of file.
    fn get_packages(&mut self) -> Vec<ReadItem>;

    fn file_stats(&self) -> FileStats;

    fn data_descriptions(&self) -> Vec<DataDescription>;

    fn cycle_descriptions(&self) -> Vec<CycleDescription>;

    fn check_end_of_file(&self) -> bool;

    /// Reposition so the next batch starts at the first package at or after
    /// `timestamp`.
    fn jump_to(&mut self, timestamp: u64) -> Result<(), ReaderError>;

    fn supports_filter(&self) -> bool {
        false
    }

    fn set_filter(&mut self, _expression: &str) -> Result<(), ReaderError> {
        Err(ReaderError::FilterUnsupported)
    }

    /// Release the file and return to the unopened state.
    fn reset(&mut self) -> Result<(), ReaderError>;
}

/// Creates readers for a set of file extensions.
pub trait ReaderFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Lower-case extensions without the leading dot.
    fn supported_extensions(&self) -> Vec<String>;

    fn create(&self) -> Box<dyn Reader>;
}

/// Errors raised while registering reader factories.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("reader factory {0} declares no file extensions")]
    NoExtensions(String),

    #[error("extension .{extension} of {factory} is already served by {existing}")]
    ExtensionConflict {
        extension: String,
        factory: String,
        existing: String,
    },
}

/// Maps file extensions to reader factories.
#[derive(Default, Clone)]
pub struct ReaderRegistry {
    factories: Vec<Arc<dyn ReaderFactory>>,
}

impl ReaderRegistry {
    pub fn new() -> Self {
        ReaderRegistry::default()
    }

    /// Registry with the readers shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = ReaderRegistry::new();
        // A fresh registry has no conflicts.
        let _ = registry.register(Arc::new(ScenarioReaderFactory));
        registry
    }

    /// Add a factory. Extensions already served by another factory are
    /// rejected as a whole so one file type never has two readers.
    pub fn register(&mut self, factory: Arc<dyn ReaderFactory>) -> Result<(), RegistryError> {
        let extensions = factory.supported_extensions();
        if extensions.is_empty() {
            return Err(RegistryError::NoExtensions(factory.name().to_string()));
        }
        for ext in &extensions {
            if let Some(existing) = self.factory_for(ext) {
                return Err(RegistryError::ExtensionConflict {
                    extension: ext.clone(),
                    factory: factory.name().to_string(),
                    existing: existing.name().to_string(),
                });
            }
        }
        tracing::debug!(
            factory = factory.name(),
            extensions = ?extensions,
            "registered reader factory"
        );
        self.factories.push(factory);
        Ok(())
    }

    fn factory_for(&self, extension: &str) -> Option<&Arc<dyn ReaderFactory>> {
        let extension = extension.to_ascii_lowercase();
        self.factories.iter().find(|f| {
            f.supported_extensions()
                .iter()
                .any(|e| e.eq_ignore_ascii_case(&extension))
        })
    }

    /// Create a reader for `path` based on its extension.
    pub fn reader_for_path(&self, path: &Path) -> Result<Box<dyn Reader>, OpenError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| OpenError::NoExtension {
                path: path.to_path_buf(),
            })?;
        self.factory_for(extension)
            .map(|f| f.create())
            .ok_or_else(|| OpenError::Unsupported {
                path: path.to_path_buf(),
                extension: extension.to_string(),
            })
    }

    /// All extensions any registered factory can open.
    pub fn supported_extensions(&self) -> BTreeSet<String> {
        self.factories
            .iter()
            .flat_map(|f| f.supported_extensions())
            .map(|e| e.to_ascii_lowercase())
            .collect()
    }
}

impl std::fmt::Debug for ReaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderRegistry")
            .field("extensions", &self.supported_extensions())
            .finish()
    }
}
