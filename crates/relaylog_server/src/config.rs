//! Relay configuration.

use std::path::PathBuf;

/// Default upper bound on messages per sync request.
pub const DEFAULT_MAX_BATCH: usize = 10_000;

/// Configuration for the sync relay.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Journal file; the relay keeps everything in memory when unset.
    pub data_path: Option<PathBuf>,
    /// Maximum number of messages accepted in one request.
    pub max_batch: usize,
    /// Whether each commit is synced to stable storage.
    pub sync_on_commit: bool,
}

impl ServerConfig {
    /// Creates an in-memory configuration with default limits.
    pub fn new() -> Self {
        Self {
            data_path: None,
            max_batch: DEFAULT_MAX_BATCH,
            sync_on_commit: true,
        }
    }

    /// Persists the log to a journal file at `path`.
    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = Some(path.into());
        self
    }

    /// Sets the maximum batch size.
    pub fn with_max_batch(mut self, max: usize) -> Self {
        self.max_batch = max;
        self
    }

    /// Sets whether commits are synced to disk.
    pub fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
