//! Log Recovery
//!
//! Rebuilds the page index from durable log contents on open.

use std::sync::Arc;

use crate::error::Result;
use crate::vfs::StorageFile;

use super::frame::{LogHeader, LOG_HEADER_SIZE};
use super::index::PageIndex;
use super::reader::LogReader;
use super::{FrameNo, PageNo};

/// Rebuilds in-memory log state after a restart or crash
pub struct LogRecovery;

/// Log state reconstructed from the file
#[derive(Debug)]
pub struct RecoveredLog {
    /// Log header, `None` for an empty log
    pub header: Option<LogHeader>,
    /// Index over committed frames only
    pub index: PageIndex,
    /// Chained checksum of the last committed frame (or the header seed)
    pub last_checksum: u32,
    /// Byte offset just past the last committed frame
    pub end_offset: u64,
}

/// Result of a recovery operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of committed frames kept
    pub frames_recovered: u64,

    /// Number of valid but uncommitted frames dropped from the tail
    pub frames_discarded: u64,

    /// Frame number of the last commit (0 if none)
    pub last_commit: FrameNo,

    /// Database size in pages at the last commit (0 if none)
    pub db_size: u32,

    /// Whether the file had bytes past the last commit. `recover` truncates
    /// them; `verify` only reports them.
    pub was_truncated: bool,
}

impl LogRecovery {
    /// Recover a log file
    ///
    /// This will:
    /// 1. Read every frame that passes salt and checksum validation
    /// 2. Keep frames up to and including the last commit frame
    /// 3. Truncate uncommitted or torn bytes from the tail
    /// 4. Return the rebuilt index and statistics
    pub fn recover(file: &Arc<dyn StorageFile>) -> Result<(RecoveredLog, RecoveryResult)> {
        let (log, result) = Self::scan(file)?;

        if result.was_truncated {
            tracing::warn!(
                "Log recovery: truncating tail at offset {} ({} uncommitted frames dropped)",
                log.end_offset,
                result.frames_discarded
            );
            file.truncate(log.end_offset)?;
            file.sync()?;
        }

        if result.frames_recovered > 0 {
            tracing::info!(
                "Log recovery: {} frames recovered, last_commit={}, db_size={}",
                result.frames_recovered,
                result.last_commit,
                result.db_size
            );
        }

        Ok((log, result))
    }

    /// Verify integrity of a log file without modifying it
    pub fn verify(file: &Arc<dyn StorageFile>) -> Result<RecoveryResult> {
        let (_, result) = Self::scan(file)?;
        Ok(result)
    }

    fn scan(file: &Arc<dyn StorageFile>) -> Result<(RecoveredLog, RecoveryResult)> {
        let mut reader = LogReader::open(Arc::clone(file))?;
        let header = reader.header().copied();
        let file_len = reader.file_len();

        let mut index = PageIndex::new();
        let mut last_checksum = reader.last_checksum();
        let mut end_offset = if header.is_some() {
            LOG_HEADER_SIZE as u64
        } else {
            0
        };

        // Frames of the transaction currently being read
        let mut pending: Vec<(PageNo, FrameNo)> = Vec::new();
        let mut frames_recovered = 0u64;

        while let Some(frame) = reader.next_frame()? {
            pending.push((frame.page_no, frame.frame_no));

            if frame.is_commit() {
                for &(page_no, frame_no) in &pending {
                    index.insert(page_no, frame_no);
                }
                index.record_commit(frame.frame_no, frame.db_size);
                frames_recovered += pending.len() as u64;
                pending.clear();

                last_checksum = reader.last_checksum();
                end_offset = reader.valid_up_to();
            }
        }

        let result = RecoveryResult {
            frames_recovered,
            frames_discarded: pending.len() as u64,
            last_commit: index.last_commit(),
            db_size: index.db_size(index.last_commit()),
            was_truncated: file_len > end_offset,
        };

        let log = RecoveredLog {
            header,
            index,
            last_checksum,
            end_offset,
        };

        Ok((log, result))
    }
}
