//! Configuration for the download service.

use std::path::PathBuf;

use crate::download::EngineConfig;

/// Default progress step, in percent, between checkpoint writes.
pub const DEFAULT_PERSIST_STEP: f64 = 10.0;

/// Default depth of the worker-to-service event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Configuration for the download service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Directory images are written to.
    pub download_dir: PathBuf,

    /// Checkpoint every time progress crosses a multiple of this many percent.
    ///
    /// State changes are always checkpointed.
    pub persist_step: f64,

    /// Bounded channel depth between a worker and its event pump.
    pub event_capacity: usize,

    /// Engine settings shared by all workers.
    pub engine: EngineConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            download_dir: dirs::download_dir()
                .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ISOs"),
            persist_step: DEFAULT_PERSIST_STEP,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            engine: EngineConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Create a configuration writing into `download_dir`.
    pub fn new(download_dir: PathBuf) -> Self {
        Self {
            download_dir,
            ..Default::default()
        }
    }

    pub fn with_persist_step(mut self, percent: f64) -> Self {
        self.persist_step = percent.clamp(0.1, 100.0);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}
