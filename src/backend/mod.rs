//! Backend Module
//!
//! The method-table contract every WAL backend satisfies, and the registry
//! a host uses to pick a backend by name.
//!
//! ## Responsibilities
//! - [`WalMethods`]: per-connection operations the pager calls
//! - [`WalBackend`]: opens connections to a named log
//! - [`BackendRegistry`]: name → backend resolution
//!
//! Callers hold `Box<dyn WalMethods>` and never name a concrete backend.

mod file;
mod memory;
mod registry;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use registry::BackendRegistry;

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use crossbeam::channel::Receiver;
use parking_lot::Mutex;

use crate::checkpoint::{BusyHandler, CheckpointMode, CheckpointResult};
use crate::config::WalConfig;
use crate::coordinator::Savepoint;
use crate::error::Result;
use crate::shared::SharedLog;
use crate::vfs::{DbWriter, StorageFile};
use crate::wal::{FrameNo, PageNo, PageWrite};

/// Exclusive-mode request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusiveOp {
    /// Report whether this connection holds exclusive mode
    Query,
    /// Take exclusive mode; `Busy` while other connections hold a read mark
    /// or the write lock
    Acquire,
    /// Give exclusive mode up
    Release,
}

/// Operations one WAL connection offers its pager
pub trait WalMethods: Send {
    /// Release everything this connection holds and detach from the log
    fn close(&mut self) -> Result<()>;

    /// Limit the log size (bytes); `None` removes the limit
    fn set_limit(&mut self, limit: Option<u64>);

    /// Start a read transaction; returns whether the log changed since the
    /// previous one
    fn begin_read(&mut self) -> Result<bool>;

    fn end_read(&mut self) -> Result<()>;

    /// Newest frame holding `page_no` in this connection's view
    fn find_frame(&self, page_no: PageNo) -> Result<Option<FrameNo>>;

    /// Copy the page image of `frame_no` into `out`
    fn read_frame(&self, frame_no: FrameNo, out: &mut [u8]) -> Result<()>;

    /// Database size in pages in this connection's view; 0 means the log
    /// has no committed frame and the main file size applies
    fn db_size(&self) -> Result<u32>;

    fn begin_write(&mut self) -> Result<()>;

    fn end_write(&mut self) -> Result<()>;

    /// Hand every pending page to `undo_page`, then discard them
    fn undo(&mut self, undo_page: &mut dyn FnMut(PageNo) -> Result<()>) -> Result<()>;

    fn savepoint(&self) -> Result<Savepoint>;

    fn rollback_to(&mut self, savepoint: &Savepoint) -> Result<()>;

    /// Append dirty pages; on commit the last frame records `db_size`
    fn append_frames(
        &mut self,
        page_size: u32,
        frames: &[PageWrite],
        db_size: u32,
        is_commit: bool,
    ) -> Result<FrameNo>;

    fn checkpoint(
        &mut self,
        mode: CheckpointMode,
        busy: Option<BusyHandler<'_>>,
    ) -> Result<CheckpointResult>;

    /// Frames in the log at this connection's last commit; reset by reading
    ///
    /// Saturates at `u32::MAX` for logs holding more frames than that.
    fn callback(&mut self) -> u32;

    /// Run a passive checkpoint once enough frames accumulated
    fn autocheckpoint(&mut self) -> Result<Option<CheckpointResult>>;

    fn exclusive_mode(&mut self, op: ExclusiveOp) -> Result<bool>;

    /// Whether the log index lives in process heap rather than shared memory
    fn heap_memory(&self) -> bool;

    /// The log's storage file
    fn file(&self) -> Arc<dyn StorageFile>;

    /// Commit notifications: last committed frame after every commit
    fn subscribe_commits(&self) -> Receiver<FrameNo>;

    /// Name of the backend serving this connection
    fn name(&self) -> &str;
}

/// A named factory of WAL connections
pub trait WalBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Open a connection to the log at `target` (a path or log name)
    fn open(
        &self,
        target: &str,
        db: Arc<dyn DbWriter>,
        config: WalConfig,
    ) -> Result<Box<dyn WalMethods>>;
}

/// Logs currently open through one backend, keyed by location
///
/// Entries are weak: a log is dropped once its last connection is gone.
pub(crate) struct LogTable<K> {
    logs: Mutex<HashMap<K, Weak<SharedLog>>>,
}

impl<K: Eq + Hash> LogTable<K> {
    pub(crate) fn new() -> Self {
        Self {
            logs: Mutex::new(HashMap::new()),
        }
    }

    /// Return the live log under `key`, or open it with `open`
    pub(crate) fn get_or_open<F>(&self, key: K, open: F) -> Result<Arc<SharedLog>>
    where
        F: FnOnce() -> Result<Arc<SharedLog>>,
    {
        let mut logs = self.logs.lock();
        logs.retain(|_, log| log.strong_count() > 0);

        if let Some(shared) = logs.get(&key).and_then(Weak::upgrade) {
            return Ok(shared);
        }

        let shared = open()?;
        logs.insert(key, Arc::downgrade(&shared));
        Ok(shared)
    }

    /// Number of logs with live connections
    pub(crate) fn live(&self) -> usize {
        self.logs
            .lock()
            .values()
            .filter(|log| log.strong_count() > 0)
            .count()
    }
}
