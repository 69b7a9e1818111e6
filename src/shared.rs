//! Shared Log Module
//!
//! The state every connection attached to one log agrees on.
//!
//! ## Responsibilities
//! - Own the [`FrameStore`] (frames, page index, sequence assignment)
//! - Track the write-lock owner, read marks and exclusive-mode owner
//! - Track how far checkpoints have backfilled the main file
//! - Fan commit notifications out to subscribers
//!
//! All of it sits behind one mutex. Frame reads and frame writes do their
//! I/O outside that mutex; see [`FrameStore`] for the append protocol.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, MutexGuard};

use crate::error::Result;
use crate::vfs::StorageFile;
use crate::wal::{FrameNo, FrameStore, RecoveryResult};

/// Identifies one connection attached to a shared log
pub type ConnId = u64;

/// One log shared by every connection that opened it
///
/// ## Concurrency Model
///
/// A single `parking_lot::Mutex` serializes:
/// - frame sequence assignment and index updates
/// - registration of read marks and the write lock
/// - log resets by RESTART/TRUNCATE checkpoints
///
/// The lock is only ever held for bookkeeping, never across the write of a
/// frame batch or the copy of a page into the main file.
pub struct SharedLog {
    /// Name the log was opened under (path or memory name)
    name: String,

    /// Log file handle, shared with the frame store
    file: Arc<dyn StorageFile>,

    state: Mutex<SharedState>,
}

/// Cross-connection state guarded by [`SharedLog`]'s mutex
pub struct SharedState {
    /// Frames and page index
    pub store: FrameStore,

    /// Connection holding the write lock
    pub writer: Option<ConnId>,

    /// Read mark of every connection with an active read transaction
    pub read_marks: HashMap<ConnId, FrameNo>,

    /// Highest frame already copied into the main file
    pub backfilled: FrameNo,

    /// Set while a checkpoint runs
    pub checkpointing: bool,

    /// Connection holding exclusive mode
    pub exclusive: Option<ConnId>,

    /// Commits written since the log was last synced
    pub commits_since_sync: usize,

    /// Number of log resets; tells snapshots of different sequence spaces apart
    pub resets: u64,

    connections: usize,
    next_conn: ConnId,
    next_txn: u64,
    subscribers: Vec<Sender<FrameNo>>,
}

impl SharedLog {
    /// Open the log stored in `file`, recovering committed frames
    pub fn open(name: impl Into<String>, file: Arc<dyn StorageFile>) -> Result<Arc<Self>> {
        let name = name.into();
        let (store, recovery) = FrameStore::open(Arc::clone(&file))?;
        log_recovery(&name, &recovery);

        let state = SharedState {
            store,
            writer: None,
            read_marks: HashMap::new(),
            backfilled: 0,
            checkpointing: false,
            exclusive: None,
            commits_since_sync: 0,
            resets: 0,
            connections: 0,
            next_conn: 1,
            next_txn: 1,
            subscribers: Vec::new(),
        };

        Ok(Arc::new(Self {
            name,
            file,
            state: Mutex::new(state),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file(&self) -> &Arc<dyn StorageFile> {
        &self.file
    }

    /// Take the serialization point
    pub fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock()
    }

    /// Register a new connection
    pub fn attach(&self) -> ConnId {
        let mut state = self.state.lock();
        let conn = state.next_conn;
        state.next_conn += 1;
        state.connections += 1;
        tracing::debug!("Connection {} attached to log {}", conn, self.name);
        conn
    }

    /// Forget everything `conn` holds; returns the connections still attached
    pub fn detach(&self, conn: ConnId) -> usize {
        let mut state = self.state.lock();
        state.read_marks.remove(&conn);
        if state.writer == Some(conn) {
            state.writer = None;
        }
        if state.exclusive == Some(conn) {
            state.exclusive = None;
        }
        state.connections = state.connections.saturating_sub(1);
        tracing::debug!(
            "Connection {} detached from log {} ({} remaining)",
            conn,
            self.name,
            state.connections
        );
        state.connections
    }

    /// Number of attached connections
    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    /// Receive the last committed frame number after every commit
    pub fn subscribe(&self) -> Receiver<FrameNo> {
        let (tx, rx) = channel::unbounded();
        self.state.lock().subscribers.push(tx);
        rx
    }
}

impl SharedState {
    /// Oldest read mark held by any connection
    pub fn oldest_mark(&self) -> Option<FrameNo> {
        self.read_marks.values().copied().min()
    }

    /// Whether a connection other than `conn` holds a read mark
    pub fn has_other_readers(&self, conn: ConnId) -> bool {
        self.read_marks.keys().any(|&c| c != conn)
    }

    /// Whether exclusive mode is held by a connection other than `conn`
    pub fn excluded(&self, conn: ConnId) -> bool {
        matches!(self.exclusive, Some(owner) if owner != conn)
    }

    /// Allocate an id for a new write transaction
    pub fn next_txn_id(&mut self) -> u64 {
        let id = self.next_txn;
        self.next_txn += 1;
        id
    }

    /// Tell subscribers about a commit, dropping the ones that hung up
    pub fn notify_commit(&mut self, frame_no: FrameNo) {
        self.subscribers.retain(|tx| tx.send(frame_no).is_ok());
    }
}

fn log_recovery(name: &str, recovery: &RecoveryResult) {
    if recovery.frames_recovered > 0 || recovery.was_truncated {
        tracing::info!(
            "Opened log {}: {} frames recovered, {} discarded, last_commit={}",
            name,
            recovery.frames_recovered,
            recovery.frames_discarded,
            recovery.last_commit
        );
    } else {
        tracing::debug!("Opened empty log {}", name);
    }
}
