//! Write Transaction Coordinator

use std::sync::Arc;

use crate::config::WalSyncStrategy;
use crate::error::{Result, WalError};
use crate::shared::{ConnId, SharedLog, SharedState};
use crate::wal::{FrameNo, FrameStore, PageNo, PageWrite};

/// Rollback point inside a write transaction
///
/// Only valid for the transaction that issued it; a commit starts a new
/// transaction, so savepoints do not survive commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint {
    txn_id: u64,
    /// Last frame of the log when taken
    frame: FrameNo,
    /// Pending frames when taken
    pending: usize,
}

impl Savepoint {
    /// Pending frames the transaction had when the savepoint was taken
    pub fn pending_frames(&self) -> usize {
        self.pending
    }
}

#[derive(Debug)]
struct WriteTxn {
    id: u64,
    /// Last commit when the transaction (re)started
    start_frame: FrameNo,
    /// Pages of the uncommitted frames, oldest first
    pending: Vec<PageNo>,
}

/// Holds the single write lock of a shared log for one connection
///
/// ## Frame lifecycle
/// Frames appended without a commit are written to the log and indexed
/// right away, but no reader can see them: read marks never go past the
/// newest commit. Rolling back rewinds the log to the commit.
pub struct WriteCoordinator {
    shared: Arc<SharedLog>,
    conn: ConnId,
    sync_strategy: WalSyncStrategy,
    /// Log size limit applied to this connection's appends
    limit: Option<u64>,
    txn: Option<WriteTxn>,
}

impl WriteCoordinator {
    pub fn new(
        shared: Arc<SharedLog>,
        conn: ConnId,
        sync_strategy: WalSyncStrategy,
        limit: Option<u64>,
    ) -> Self {
        Self {
            shared,
            conn,
            sync_strategy,
            limit,
            txn: None,
        }
    }

    pub fn set_limit(&mut self, limit: Option<u64>) {
        self.limit = limit;
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn is_active(&self) -> bool {
        self.txn.is_some()
    }

    /// Number of uncommitted frames
    pub fn pending_frames(&self) -> usize {
        self.txn.as_ref().map(|t| t.pending.len()).unwrap_or(0)
    }

    /// Take the write lock
    ///
    /// `read_mark` is the connection's current snapshot; writing on top of a
    /// snapshot that a later commit superseded is refused with `Busy`.
    pub fn begin_write(&mut self, read_mark: Option<FrameNo>) -> Result<()> {
        if self.txn.is_some() {
            return Err(WalError::Misuse("write transaction already active".to_string()));
        }

        let mut state = self.shared.lock();
        if state.excluded(self.conn) {
            return Err(WalError::Busy(
                "another connection holds the log in exclusive mode".to_string(),
            ));
        }
        if let Some(owner) = state.writer {
            if owner != self.conn {
                return Err(WalError::Busy(format!(
                    "connection {} holds the write lock",
                    owner
                )));
            }
        }
        let last_commit = state.store.last_commit();
        if let Some(mark) = read_mark {
            if mark < last_commit {
                return Err(WalError::Busy(format!(
                    "read snapshot {} is older than the last commit {}",
                    mark, last_commit
                )));
            }
        }

        // Leftovers of a writer whose rollback failed mid-way
        if state.store.max_frame() > last_commit {
            state.store.rewind_to_commit()?;
        }

        state.writer = Some(self.conn);
        let id = state.next_txn_id();
        drop(state);

        self.txn = Some(WriteTxn {
            id,
            start_frame: last_commit,
            pending: Vec::new(),
        });
        tracing::debug!("Connection {} began write txn {}", self.conn, id);
        Ok(())
    }

    /// Append a batch of frames; returns the last frame number
    ///
    /// With `is_commit` the last frame carries `db_size` and the whole
    /// transaction becomes visible to later readers.
    pub fn append_frames(
        &mut self,
        page_size: u32,
        frames: &[PageWrite],
        db_size: u32,
        is_commit: bool,
    ) -> Result<FrameNo> {
        let txn = self
            .txn
            .as_mut()
            .ok_or_else(|| WalError::Misuse("no write transaction is active".to_string()))?;
        txn.pending.try_reserve(frames.len())?;
        let commit = is_commit.then_some(db_size);

        // Step 1: Encode under the lock
        let (plan, sync) = {
            let mut state = self.shared.lock();
            if state.writer != Some(self.conn) {
                return Err(WalError::Misuse(
                    "write lock is not held by this connection".to_string(),
                ));
            }
            state.store.set_limit(self.limit);
            let plan = match state.store.prepare(page_size, frames, commit) {
                Ok(plan) => plan,
                Err(e @ WalError::CapacityExceeded(_)) => {
                    state.store.rewind_to_commit()?;
                    txn.pending.clear();
                    tracing::warn!(
                        "Connection {} rolled back txn {}: {}",
                        self.conn,
                        txn.id,
                        e
                    );
                    return Err(e);
                }
                Err(e) => return Err(e),
            };
            let sync = is_commit && should_sync(self.sync_strategy, &state);
            (plan, sync)
        };

        // Step 2: Write without it; the write lock keeps the tail ours
        let file = self.shared.file();
        FrameStore::write_plan(file.as_ref(), &plan)?;
        if sync {
            file.sync()?;
        }

        // Step 3: Publish
        let mut state = self.shared.lock();
        let last = state.store.publish(plan)?;
        txn.pending.extend(frames.iter().map(|f| f.page_no));

        if is_commit {
            state.commits_since_sync = if sync {
                0
            } else {
                state.commits_since_sync + 1
            };
            // The committer's own snapshot moves to include its commit
            if let Some(mark) = state.read_marks.get_mut(&self.conn) {
                *mark = last;
            }
            state.notify_commit(last);
            txn.id = state.next_txn_id();
            txn.start_frame = last;
            txn.pending.clear();
            tracing::debug!(
                "Connection {} committed through frame {} (db_size={})",
                self.conn,
                last,
                db_size
            );
        } else {
            tracing::trace!("Connection {} appended through frame {}", self.conn, last);
        }
        Ok(last)
    }

    /// Capture a rollback point
    pub fn savepoint(&self) -> Result<Savepoint> {
        let txn = self.active_txn()?;
        Ok(Savepoint {
            txn_id: txn.id,
            frame: txn.start_frame + txn.pending.len() as u64,
            pending: txn.pending.len(),
        })
    }

    /// Discard frames appended after `savepoint`
    pub fn rollback_to(&mut self, savepoint: &Savepoint) -> Result<()> {
        let txn = self
            .txn
            .as_mut()
            .ok_or_else(|| WalError::Misuse("no write transaction is active".to_string()))?;
        if savepoint.txn_id != txn.id || savepoint.pending > txn.pending.len() {
            return Err(WalError::Misuse(
                "savepoint does not belong to the active transaction".to_string(),
            ));
        }

        self.shared.lock().store.rewind_to(savepoint.frame)?;
        txn.pending.truncate(savepoint.pending);
        tracing::debug!(
            "Connection {} rolled back to {} pending frames",
            self.conn,
            savepoint.pending
        );
        Ok(())
    }

    /// Report every pending page (newest first), then discard them
    pub fn undo(&mut self, undo_page: &mut dyn FnMut(PageNo) -> Result<()>) -> Result<()> {
        let txn = self
            .txn
            .as_mut()
            .ok_or_else(|| WalError::Misuse("no write transaction is active".to_string()))?;

        for &page_no in txn.pending.iter().rev() {
            undo_page(page_no)?;
        }

        self.shared.lock().store.rewind_to(txn.start_frame)?;
        txn.pending.clear();
        Ok(())
    }

    /// Release the write lock, discarding uncommitted frames
    pub fn end_write(&mut self) -> Result<()> {
        let txn = self
            .txn
            .take()
            .ok_or_else(|| WalError::Misuse("no write transaction is active".to_string()))?;

        let mut state = self.shared.lock();
        let rewound = if txn.pending.is_empty() {
            Ok(())
        } else {
            state.store.rewind_to(txn.start_frame)
        };
        if state.writer == Some(self.conn) {
            state.writer = None;
        }
        tracing::debug!(
            "Connection {} ended write txn {} ({} frames discarded)",
            self.conn,
            txn.id,
            txn.pending.len()
        );
        rewound
    }

    /// End the write transaction if one is active
    pub fn release(&mut self) {
        if self.txn.is_some() {
            if let Err(e) = self.end_write() {
                tracing::warn!("Connection {} failed to roll back: {}", self.conn, e);
            }
        }
    }

    fn active_txn(&self) -> Result<&WriteTxn> {
        self.txn
            .as_ref()
            .ok_or_else(|| WalError::Misuse("no write transaction is active".to_string()))
    }
}

impl Drop for WriteCoordinator {
    fn drop(&mut self) {
        self.release();
    }
}

/// Whether the commit about to be written should fsync the log
fn should_sync(strategy: WalSyncStrategy, state: &SharedState) -> bool {
    match strategy {
        WalSyncStrategy::EveryCommit => true,
        WalSyncStrategy::EveryNCommits { count } => state.commits_since_sync + 1 >= count,
        WalSyncStrategy::Never => false,
    }
}
