//! WAL Connection
//!
//! One pager's handle on a shared log: the [`WalMethods`] implementation
//! both shipped backends hand out.
//!
//! ## Responsibilities
//! - Own the read and write coordinators for this connection
//! - Resolve page lookups against the right snapshot
//! - Run checkpoints against this connection's main-file writer
//! - Release marks and locks on close and on drop

use std::sync::Arc;

use crossbeam::channel::Receiver;

use crate::backend::{ExclusiveOp, WalMethods};
use crate::checkpoint::{BusyHandler, CheckpointMode, CheckpointResult, Checkpointer};
use crate::config::WalConfig;
use crate::coordinator::{ReadCoordinator, Savepoint, WriteCoordinator};
use crate::error::{Result, WalError};
use crate::shared::{ConnId, SharedLog};
use crate::vfs::{DbWriter, StorageFile};
use crate::wal::{FrameNo, FrameStore, PageNo, PageWrite};

/// A connection to a shared log
///
/// ## Visibility
/// - A reader sees frames up to its read mark
/// - The writer also sees its own uncommitted frames
/// - A commit moves the committer's read mark to that commit
/// - A connection with neither transaction sees nothing (`Misuse`)
pub struct WalConnection {
    shared: Arc<SharedLog>,
    conn: ConnId,
    config: WalConfig,

    /// Main database file, target of checkpoints
    db: Arc<dyn DbWriter>,

    read: ReadCoordinator,
    write: WriteCoordinator,

    /// Frames in the log at this connection's last commit, until read
    pending_callback: u32,

    backend: String,
    closed: bool,
}

impl WalConnection {
    /// Attach a new connection to `shared`
    pub fn open(
        shared: Arc<SharedLog>,
        db: Arc<dyn DbWriter>,
        config: WalConfig,
        backend: impl Into<String>,
    ) -> Result<Self> {
        config.validate()?;

        let conn = shared.attach();
        let read = ReadCoordinator::new(Arc::clone(&shared), conn);
        let write = WriteCoordinator::new(
            Arc::clone(&shared),
            conn,
            config.sync_strategy,
            config.max_log_size,
        );

        Ok(Self {
            shared,
            conn,
            config,
            db,
            read,
            write,
            pending_callback: 0,
            backend: backend.into(),
            closed: false,
        })
    }

    /// Id of this connection within its log
    pub fn id(&self) -> ConnId {
        self.conn
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// The shared log this connection is attached to
    pub fn shared(&self) -> &Arc<SharedLog> {
        &self.shared
    }

    /// Current read mark, if a read transaction is active
    pub fn read_mark(&self) -> Option<FrameNo> {
        self.read.mark()
    }

    /// Whether this connection holds the write lock
    pub fn in_write(&self) -> bool {
        self.write.is_active()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(WalError::Misuse("connection is closed".to_string()));
        }
        Ok(())
    }

    /// Highest frame this connection may see
    fn visible_upto(&self) -> Result<FrameNo> {
        self.ensure_open()?;
        if self.write.is_active() {
            return Ok(self.shared.lock().store.max_frame());
        }
        self.read
            .mark()
            .ok_or_else(|| WalError::Misuse("no read transaction is active".to_string()))
    }

    fn release(&mut self) {
        self.write.release();
        self.read.release();
    }
}

impl WalMethods for WalConnection {
    fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.release();

        let mut outcome = Ok(());
        if self.config.checkpoint_on_close && self.shared.connections() == 1 {
            match self.checkpoint(CheckpointMode::Truncate, None) {
                Ok(_) => {}
                Err(e) if e.is_busy() => {
                    tracing::debug!("Checkpoint on close of {} skipped: {}", self.shared.name(), e)
                }
                Err(e) => outcome = Err(e),
            }
        }

        self.closed = true;
        self.shared.detach(self.conn);
        outcome
    }

    fn set_limit(&mut self, limit: Option<u64>) {
        self.write.set_limit(limit);
    }

    fn begin_read(&mut self) -> Result<bool> {
        self.ensure_open()?;
        self.read.begin_read()
    }

    fn end_read(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.read.end_read()
    }

    fn find_frame(&self, page_no: PageNo) -> Result<Option<FrameNo>> {
        let upto = self.visible_upto()?;
        if upto == 0 {
            return Ok(None);
        }
        Ok(self.shared.lock().store.find(page_no, upto))
    }

    fn read_frame(&self, frame_no: FrameNo, out: &mut [u8]) -> Result<()> {
        let upto = self.visible_upto()?;
        if frame_no > upto {
            return Err(WalError::Misuse(format!(
                "frame {} is beyond this connection's snapshot {}",
                frame_no, upto
            )));
        }
        let location = self.shared.lock().store.locate(frame_no)?;
        FrameStore::read_located(self.shared.file().as_ref(), &location, out)
    }

    fn db_size(&self) -> Result<u32> {
        let upto = self.visible_upto()?;
        Ok(self.shared.lock().store.logical_size(upto))
    }

    fn begin_write(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.write.begin_write(self.read.mark())
    }

    fn end_write(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.write.end_write()
    }

    fn undo(&mut self, undo_page: &mut dyn FnMut(PageNo) -> Result<()>) -> Result<()> {
        self.ensure_open()?;
        self.write.undo(undo_page)
    }

    fn savepoint(&self) -> Result<Savepoint> {
        self.ensure_open()?;
        self.write.savepoint()
    }

    fn rollback_to(&mut self, savepoint: &Savepoint) -> Result<()> {
        self.ensure_open()?;
        self.write.rollback_to(savepoint)
    }

    fn append_frames(
        &mut self,
        page_size: u32,
        frames: &[PageWrite],
        db_size: u32,
        is_commit: bool,
    ) -> Result<FrameNo> {
        self.ensure_open()?;
        let last = self
            .write
            .append_frames(page_size, frames, db_size, is_commit)?;
        if is_commit {
            self.read.follow_commit(last);
            self.pending_callback = u32::try_from(last).unwrap_or(u32::MAX);
        }
        Ok(last)
    }

    fn checkpoint(
        &mut self,
        mode: CheckpointMode,
        busy: Option<BusyHandler<'_>>,
    ) -> Result<CheckpointResult> {
        self.ensure_open()?;
        if self.write.pending_frames() > 0 {
            return Err(WalError::Misuse(
                "cannot checkpoint with uncommitted frames".to_string(),
            ));
        }

        Checkpointer::new(
            &self.shared,
            self.conn,
            self.db.as_ref(),
            self.config.checkpoint_sync,
            busy,
        )
        .run(mode)
    }

    fn callback(&mut self) -> u32 {
        std::mem::take(&mut self.pending_callback)
    }

    fn autocheckpoint(&mut self) -> Result<Option<CheckpointResult>> {
        let threshold = self.config.autocheckpoint_frames;
        if threshold == 0 || self.pending_callback < threshold {
            return Ok(None);
        }

        let frames = self.callback();
        tracing::debug!("Autocheckpoint of {} at {} frames", self.shared.name(), frames);
        match self.checkpoint(CheckpointMode::Passive, None) {
            Ok(result) => Ok(Some(result)),
            Err(e) if e.is_busy() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn exclusive_mode(&mut self, op: ExclusiveOp) -> Result<bool> {
        self.ensure_open()?;
        let mut state = self.shared.lock();
        match op {
            ExclusiveOp::Query => Ok(state.exclusive == Some(self.conn)),
            ExclusiveOp::Acquire => {
                if state.exclusive == Some(self.conn) {
                    return Ok(true);
                }
                let writer_elsewhere = matches!(state.writer, Some(w) if w != self.conn);
                if state.exclusive.is_some()
                    || writer_elsewhere
                    || state.has_other_readers(self.conn)
                {
                    return Err(WalError::Busy(
                        "other connections are using the log".to_string(),
                    ));
                }
                state.exclusive = Some(self.conn);
                tracing::debug!("Connection {} entered exclusive mode", self.conn);
                Ok(true)
            }
            ExclusiveOp::Release => {
                if state.exclusive == Some(self.conn) {
                    state.exclusive = None;
                    tracing::debug!("Connection {} left exclusive mode", self.conn);
                }
                Ok(false)
            }
        }
    }

    fn heap_memory(&self) -> bool {
        true
    }

    fn file(&self) -> Arc<dyn StorageFile> {
        Arc::clone(self.shared.file())
    }

    fn subscribe_commits(&self) -> Receiver<FrameNo> {
        self.shared.subscribe()
    }

    fn name(&self) -> &str {
        &self.backend
    }
}

impl Drop for WalConnection {
    fn drop(&mut self) {
        if !self.closed {
            self.release();
            self.shared.detach(self.conn);
        }
    }
}
