//! Collaborators handed to a player at construction.

use rp_config::{ConfigSnapshot, ConfigStore};
use std::sync::Arc;

use crate::pacing::{Clock, SystemClock};
use crate::publish::{NoopOrchestrator, NullBus, NullStatusSink, Orchestrator, PublishBus, StatusSink};
use crate::reader::ReaderRegistry;

/// Explicit handles to everything outside the replay pipeline.
#[derive(Clone)]
pub struct PlayerContext {
    pub config: Arc<dyn ConfigStore>,
    pub registry: Arc<ReaderRegistry>,
    pub bus: Arc<dyn PublishBus>,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub status_sink: Arc<dyn StatusSink>,
    pub clock: Arc<dyn Clock>,
    /// Attached to "recording loaded" events when present.
    pub snapshot: Option<ConfigSnapshot>,
}

impl PlayerContext {
    /// Context with built-in readers and silent outputs.
    pub fn new(config: Arc<dyn ConfigStore>) -> Self {
        PlayerContext {
            config,
            registry: Arc::new(ReaderRegistry::with_builtin()),
            bus: Arc::new(NullBus),
            orchestrator: Arc::new(NoopOrchestrator),
            status_sink: Arc::new(NullStatusSink),
            clock: Arc::new(SystemClock::default()),
            snapshot: None,
        }
    }

    pub fn with_registry(mut self, registry: ReaderRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_bus(mut self, bus: Arc<dyn PublishBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_orchestrator(mut self, orchestrator: Arc<dyn Orchestrator>) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status_sink = sink;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_snapshot(mut self, snapshot: ConfigSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

impl std::fmt::Debug for PlayerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerContext")
            .field("registry", &self.registry)
            .field(
                "config_hash",
                &self.snapshot.as_ref().map(|s| s.config_hash.as_str()),
            )
            .finish_non_exhaustive()
    }
}
