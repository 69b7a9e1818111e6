//! Checkpoint Engine
//!
//! Copies committed frames back into the main database file and reclaims
//! log space.
//!
//! ## Modes
//! ```text
//! PASSIVE   backfill up to the oldest read mark; never waits
//! FULL      take the write lock, wait for readers to reach the last commit,
//!           backfill everything
//! RESTART   FULL, then wait for all readers to finish and reset the log
//! TRUNCATE  RESTART, then shrink the log file to zero bytes
//! ```
//!
//! Pages are copied in page-number order, each at most once per checkpoint,
//! taking the newest version at or below the safe bound.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, WalError};
use crate::shared::{ConnId, SharedLog, SharedState};
use crate::vfs::DbWriter;
use crate::wal::FrameStore;

/// How hard a checkpoint tries
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CheckpointMode {
    Passive,
    Full,
    Restart,
    Truncate,
}

impl CheckpointMode {
    fn waits_for_readers(self) -> bool {
        self >= CheckpointMode::Full
    }

    fn resets_log(self) -> bool {
        self >= CheckpointMode::Restart
    }
}

impl fmt::Display for CheckpointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckpointMode::Passive => "passive",
            CheckpointMode::Full => "full",
            CheckpointMode::Restart => "restart",
            CheckpointMode::Truncate => "truncate",
        };
        f.write_str(name)
    }
}

impl FromStr for CheckpointMode {
    type Err = WalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "passive" => Ok(CheckpointMode::Passive),
            "full" => Ok(CheckpointMode::Full),
            "restart" => Ok(CheckpointMode::Restart),
            "truncate" => Ok(CheckpointMode::Truncate),
            other => Err(WalError::Config(format!("unknown checkpoint mode: {}", other))),
        }
    }
}

/// Log counters reported by a checkpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointResult {
    /// Committed frames in the log
    pub frames_in_log: u64,
    /// Of those, frames now reflected in the main file
    pub frames_backfilled: u64,
}

/// Caller-supplied retry policy: gets the attempt number, returns whether
/// to try again
pub type BusyHandler<'a> = &'a mut dyn FnMut(u32) -> bool;

/// One checkpoint run on behalf of a connection
pub struct Checkpointer<'a, 'b> {
    shared: &'a SharedLog,
    conn: ConnId,
    db: &'a dyn DbWriter,
    sync_db: bool,
    busy: Option<BusyHandler<'b>>,
    attempts: u32,
}

impl<'a, 'b> Checkpointer<'a, 'b> {
    pub fn new(
        shared: &'a SharedLog,
        conn: ConnId,
        db: &'a dyn DbWriter,
        sync_db: bool,
        busy: Option<BusyHandler<'b>>,
    ) -> Self {
        Self {
            shared,
            conn,
            db,
            sync_db,
            busy,
            attempts: 0,
        }
    }

    /// Run a checkpoint in `mode`
    pub fn run(mut self, mode: CheckpointMode) -> Result<CheckpointResult> {
        let mut guard = CheckpointGuard::enter(self.shared, self.conn)?;

        if mode.waits_for_readers() {
            self.acquire_writer(&mut guard)?;
            self.wait_for(|state, conn| {
                let last = state.store.last_commit();
                state
                    .read_marks
                    .iter()
                    .all(|(&c, &mark)| c == conn || mark >= last)
            })?;
        }

        let result = self.backfill(mode)?;

        if mode.resets_log() {
            self.wait_for(|state, conn| !state.has_other_readers(conn))?;
            return self.reset(mode, result);
        }

        tracing::info!(
            "Checkpoint ({}) of {}: {}/{} frames backfilled",
            mode,
            self.shared.name(),
            result.frames_backfilled,
            result.frames_in_log
        );
        Ok(result)
    }

    /// Copy frames in `(backfilled, bound]` into the main file
    fn backfill(&mut self, mode: CheckpointMode) -> Result<CheckpointResult> {
        let (bound, plan, db_size, page_size) = {
            let state = self.shared.lock();
            let last = state.store.last_commit();
            let bound = state.oldest_mark().map_or(last, |mark| mark.min(last));

            if bound <= state.backfilled {
                if mode == CheckpointMode::Passive && state.backfilled < last {
                    return Err(WalError::Busy(format!(
                        "readers pin the log at frame {}, nothing more to backfill",
                        bound
                    )));
                }
                return Ok(CheckpointResult {
                    frames_in_log: last,
                    frames_backfilled: state.backfilled.min(last),
                });
            }

            let mut plan = Vec::new();
            for (page_no, frame_no) in state.store.index().backfill_plan(state.backfilled, bound) {
                plan.push((page_no, state.store.locate(frame_no)?));
            }
            let page_size = state.store.page_size().ok_or_else(|| {
                WalError::Corrupt("log holds committed frames but no page size".to_string())
            })?;
            (bound, plan, state.store.logical_size(bound), page_size)
        };

        let mut buf = vec![0u8; page_size as usize];
        for (page_no, location) in &plan {
            FrameStore::read_located(self.shared.file().as_ref(), location, &mut buf)?;
            self.db.write_page(*page_no, &buf)?;
        }
        self.db.set_page_count(db_size, page_size as usize)?;
        if self.sync_db {
            self.db.sync()?;
        }

        let mut state = self.shared.lock();
        state.backfilled = bound;
        tracing::debug!(
            "Backfilled {} pages through frame {} (db_size={})",
            plan.len(),
            bound,
            db_size
        );
        Ok(CheckpointResult {
            frames_in_log: state.store.last_commit(),
            frames_backfilled: bound,
        })
    }

    /// Start a new sequence space once every frame is in the main file
    fn reset(&mut self, mode: CheckpointMode, result: CheckpointResult) -> Result<CheckpointResult> {
        let mut state = self.shared.lock();
        if state.has_other_readers(self.conn) || state.read_marks.contains_key(&self.conn) {
            return Err(WalError::Busy("readers still hold the log".to_string()));
        }
        if state.backfilled < state.store.last_commit() {
            return Err(WalError::Busy(
                "log gained commits during the checkpoint".to_string(),
            ));
        }

        let had_log = state.store.header().is_some();
        if mode == CheckpointMode::Truncate {
            state.store.truncate()?;
        } else {
            state.store.restart()?;
        }
        state.backfilled = 0;
        if had_log {
            state.resets += 1;
        }

        tracing::info!(
            "Checkpoint ({}) of {}: {} frames backfilled, log reset to seq {}",
            mode,
            self.shared.name(),
            result.frames_backfilled,
            state.store.checkpoint_seq()
        );

        if mode == CheckpointMode::Truncate {
            Ok(CheckpointResult::default())
        } else {
            Ok(result)
        }
    }

    fn acquire_writer(&mut self, guard: &mut CheckpointGuard<'_>) -> Result<()> {
        let conn = self.conn;
        let mut took = false;
        self.wait_for(|state, _| match state.writer {
            Some(owner) => owner == conn,
            None if state.excluded(conn) => false,
            None => {
                state.writer = Some(conn);
                took = true;
                true
            }
        })?;
        guard.took_writer = took;
        Ok(())
    }

    /// Re-check `ready` under the lock until it holds or the busy handler
    /// gives up
    fn wait_for<F>(&mut self, mut ready: F) -> Result<()>
    where
        F: FnMut(&mut SharedState, ConnId) -> bool,
    {
        loop {
            if ready(&mut self.shared.lock(), self.conn) {
                return Ok(());
            }
            self.attempts += 1;
            let retry = match self.busy.as_mut() {
                Some(handler) => (*handler)(self.attempts),
                None => false,
            };
            if !retry {
                return Err(WalError::Busy(
                    "checkpoint is blocked by other connections".to_string(),
                ));
            }
        }
    }
}

/// Clears checkpoint flags on every exit path
struct CheckpointGuard<'a> {
    shared: &'a SharedLog,
    conn: ConnId,
    took_writer: bool,
}

impl<'a> CheckpointGuard<'a> {
    fn enter(shared: &'a SharedLog, conn: ConnId) -> Result<Self> {
        let mut state = shared.lock();
        if state.checkpointing {
            return Err(WalError::Busy("another checkpoint is running".to_string()));
        }
        state.checkpointing = true;
        Ok(Self {
            shared,
            conn,
            took_writer: false,
        })
    }
}

impl Drop for CheckpointGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.checkpointing = false;
        if self.took_writer && state.writer == Some(self.conn) {
            state.writer = None;
        }
    }
}
