//! Snapshot / Read Coordinator

use std::sync::Arc;

use crate::error::{Result, WalError};
use crate::shared::{ConnId, SharedLog};
use crate::wal::FrameNo;

/// Grants one connection its read marks
pub struct ReadCoordinator {
    shared: Arc<SharedLog>,
    conn: ConnId,

    /// Mark of the active read transaction
    mark: Option<FrameNo>,

    /// (log resets, mark) of the previous snapshot, for change detection
    last_snapshot: Option<(u64, FrameNo)>,
}

impl ReadCoordinator {
    pub fn new(shared: Arc<SharedLog>, conn: ConnId) -> Self {
        Self {
            shared,
            conn,
            mark: None,
            last_snapshot: None,
        }
    }

    /// Start a read transaction at the newest commit
    ///
    /// Returns `true` when the log changed since this connection's previous
    /// snapshot, so the caller knows to drop cached pages.
    pub fn begin_read(&mut self) -> Result<bool> {
        if self.mark.is_some() {
            return Err(WalError::Misuse("read transaction already active".to_string()));
        }

        let snapshot = {
            let mut state = self.shared.lock();
            if state.excluded(self.conn) {
                return Err(WalError::Busy(
                    "another connection holds the log in exclusive mode".to_string(),
                ));
            }
            let mark = state.store.last_commit();
            state.read_marks.insert(self.conn, mark);
            (state.resets, mark)
        };

        let changed = self.last_snapshot != Some(snapshot);
        self.last_snapshot = Some(snapshot);
        self.mark = Some(snapshot.1);

        tracing::debug!(
            "Connection {} began read at mark {} (changed={})",
            self.conn,
            snapshot.1,
            changed
        );
        Ok(changed)
    }

    /// Finish the active read transaction
    pub fn end_read(&mut self) -> Result<()> {
        if self.mark.take().is_none() {
            return Err(WalError::Misuse("no read transaction is active".to_string()));
        }
        self.shared.lock().read_marks.remove(&self.conn);
        tracing::debug!("Connection {} ended read", self.conn);
        Ok(())
    }

    /// Move the active snapshot to this connection's own commit at `last`
    ///
    /// The shared read mark is advanced by the write coordinator while it
    /// publishes the commit; this brings the local copy in line.
    pub fn follow_commit(&mut self, last: FrameNo) {
        if self.mark.is_none() {
            return;
        }
        self.mark = Some(last);
        if let Some((resets, _)) = self.last_snapshot {
            self.last_snapshot = Some((resets, last));
        }
    }

    /// Mark of the active read transaction
    pub fn mark(&self) -> Option<FrameNo> {
        self.mark
    }

    pub fn is_active(&self) -> bool {
        self.mark.is_some()
    }

    /// End the read transaction if one is active
    pub fn release(&mut self) {
        if self.mark.take().is_some() {
            self.shared.lock().read_marks.remove(&self.conn);
        }
    }
}

impl Drop for ReadCoordinator {
    fn drop(&mut self) {
        self.release();
    }
}
