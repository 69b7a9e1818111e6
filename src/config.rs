//! Configuration for vwal
//!
//! Centralized configuration with sensible defaults.

use crate::error::{Result, WalError};

/// Configuration for a WAL connection
#[derive(Debug, Clone)]
pub struct WalConfig {
    // -------------------------------------------------------------------------
    // Log Size
    // -------------------------------------------------------------------------
    /// Hard limit on the log file size in bytes (`None` = unlimited).
    /// A transaction that would grow the log past this limit is rolled back
    /// with `CapacityExceeded`.
    pub max_log_size: Option<u64>,

    // -------------------------------------------------------------------------
    // Durability
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the log after commits
    pub sync_strategy: WalSyncStrategy,

    /// Sync the main database file after each checkpoint backfill
    pub checkpoint_sync: bool,

    // -------------------------------------------------------------------------
    // Checkpointing
    // -------------------------------------------------------------------------
    /// Frames in the log at which `autocheckpoint()` runs a passive
    /// checkpoint (0 disables)
    pub autocheckpoint_frames: u32,

    /// Run a TRUNCATE checkpoint when the last connection to a log closes
    pub checkpoint_on_close: bool,
}

/// Log sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every commit (safest, slowest)
    EveryCommit,

    /// fsync after N commits (balanced durability/performance)
    EveryNCommits { count: usize },

    /// Never fsync the log; leave it to the OS (ephemeral logs, tests)
    Never,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            max_log_size: None,
            sync_strategy: WalSyncStrategy::EveryCommit,
            checkpoint_sync: true,
            autocheckpoint_frames: 1000,
            checkpoint_on_close: true,
        }
    }
}

impl WalConfig {
    /// Create a new config builder
    pub fn builder() -> WalConfigBuilder {
        WalConfigBuilder::default()
    }

    /// Reject settings that can never work
    pub fn validate(&self) -> Result<()> {
        if let WalSyncStrategy::EveryNCommits { count: 0 } = self.sync_strategy {
            return Err(WalError::Config(
                "EveryNCommits requires a count of at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for WalConfig
#[derive(Default)]
pub struct WalConfigBuilder {
    config: WalConfig,
}

impl WalConfigBuilder {
    /// Set the log size limit in bytes (`None` = unlimited)
    pub fn max_log_size(mut self, limit: Option<u64>) -> Self {
        self.config.max_log_size = limit;
        self
    }

    /// Set the log sync strategy
    pub fn sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Sync (or not) the main database file after backfill
    pub fn checkpoint_sync(mut self, enabled: bool) -> Self {
        self.config.checkpoint_sync = enabled;
        self
    }

    /// Set the auto-checkpoint threshold in frames (0 disables)
    pub fn autocheckpoint_frames(mut self, frames: u32) -> Self {
        self.config.autocheckpoint_frames = frames;
        self
    }

    /// Truncate the log when the last connection closes
    pub fn checkpoint_on_close(mut self, enabled: bool) -> Self {
        self.config.checkpoint_on_close = enabled;
        self
    }

    pub fn build(self) -> WalConfig {
        self.config
    }
}
