//! Frame Store
//!
//! Append-only log of page frames plus the in-memory index over them.
//!
//! ## Append protocol
//! Appends are split in three steps so the shared log can keep its lock
//! short: [`FrameStore::prepare`] assigns frame numbers and encodes bytes
//! without mutating anything, [`FrameStore::write_plan`] performs the I/O,
//! and [`FrameStore::publish`] makes the frames part of the index. A failure
//! before `publish` leaves the store exactly as it was.

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, WalError};
use crate::vfs::StorageFile;

use super::frame::{
    encode_frame, frame_offset, frame_size, is_valid_page_size, FrameHeader, LogHeader,
    PageWrite, FRAME_HEADER_SIZE, LOG_HEADER_SIZE,
};
use super::index::PageIndex;
use super::recovery::{LogRecovery, RecoveryResult};
use super::{FrameNo, PageNo};

/// Frames waiting to be written, produced by [`FrameStore::prepare`]
#[derive(Debug)]
pub struct AppendPlan {
    /// File offset of the first byte in `bytes`
    offset: u64,
    /// Optional log header followed by encoded frames
    bytes: Vec<u8>,
    /// Header to install if this plan starts a new log
    new_header: Option<LogHeader>,
    /// Frame number the first frame receives
    first_frame: FrameNo,
    /// Page of each frame, in order
    pages: Vec<PageNo>,
    /// Database size if the last frame commits
    commit: Option<u32>,
    /// Chained checksum after the last frame
    tail_checksum: u32,
}

impl AppendPlan {
    /// Frame number of the last frame in this plan
    pub fn last_frame(&self) -> FrameNo {
        self.first_frame + self.pages.len() as u64 - 1
    }

    pub fn first_frame(&self) -> FrameNo {
        self.first_frame
    }

    pub fn frame_count(&self) -> usize {
        self.pages.len()
    }

    pub fn is_commit(&self) -> bool {
        self.commit.is_some()
    }
}

/// Where a frame lives on disk
#[derive(Debug, Clone, Copy)]
pub struct FrameLocation {
    pub frame_no: FrameNo,
    /// Page the index says the frame holds
    pub page_no: PageNo,
    pub offset: u64,
    pub page_size: u32,
    pub salt: u64,
}

/// The log file and its page index
///
/// ## Concurrency:
/// `FrameStore` itself is not synchronized; the shared log keeps it behind
/// its single mutex. Reads via [`FrameStore::read_located`] take only the
/// file handle and can run without that mutex.
pub struct FrameStore {
    /// Underlying log file
    file: Arc<dyn StorageFile>,

    /// Header currently on disk; `None` until the first frame is written
    header: Option<LogHeader>,

    /// Page size fixed by the first committed frame
    fixed_page_size: Option<u32>,

    /// Index over every frame in the log, committed or not
    index: PageIndex,

    /// Chained checksum of the newest frame (or the header seed)
    tail_checksum: u32,

    /// Chained checksum of the newest commit frame (or the header seed)
    commit_checksum: u32,

    /// Sequence-space counter for the next header
    checkpoint_seq: u32,

    /// Salt for the next header
    next_salt: u64,

    /// Log size limit in bytes
    max_log_size: Option<u64>,
}

impl FrameStore {
    /// Open a frame store over `file`, rebuilding the index from its contents
    pub fn open(file: Arc<dyn StorageFile>) -> Result<(Self, RecoveryResult)> {
        let (log, result) = LogRecovery::recover(&file)?;

        let (fixed_page_size, checkpoint_seq, next_salt) = match &log.header {
            Some(h) => (Some(h.page_size), h.checkpoint_seq, h.salt.wrapping_add(1)),
            None => (None, 0, initial_salt()),
        };

        let store = Self {
            file,
            header: log.header,
            fixed_page_size,
            index: log.index,
            tail_checksum: log.last_checksum,
            commit_checksum: log.last_checksum,
            checkpoint_seq,
            next_salt,
            max_log_size: None,
        };

        Ok((store, result))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Page size shared by the frames of this log, once known
    pub fn page_size(&self) -> Option<u32> {
        self.fixed_page_size
            .or_else(|| self.header.map(|h| h.page_size))
    }

    pub fn header(&self) -> Option<&LogHeader> {
        self.header.as_ref()
    }

    pub fn file(&self) -> &Arc<dyn StorageFile> {
        &self.file
    }

    pub fn index(&self) -> &PageIndex {
        &self.index
    }

    /// Highest frame in the log, committed or not
    pub fn max_frame(&self) -> FrameNo {
        self.index.max_frame()
    }

    /// Newest commit frame, 0 if none
    pub fn last_commit(&self) -> FrameNo {
        self.index.last_commit()
    }

    pub fn checkpoint_seq(&self) -> u32 {
        self.header
            .map(|h| h.checkpoint_seq)
            .unwrap_or(self.checkpoint_seq)
    }

    /// Bytes the log occupies up to its newest frame
    pub fn log_bytes(&self) -> u64 {
        match self.page_size() {
            Some(page_size) if self.header.is_some() => {
                LOG_HEADER_SIZE as u64 + self.max_frame() * frame_size(page_size)
            }
            _ => 0,
        }
    }

    pub fn max_log_size(&self) -> Option<u64> {
        self.max_log_size
    }

    pub fn set_limit(&mut self, limit: Option<u64>) {
        self.max_log_size = limit;
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Newest frame for `page_no` visible at `visible_upto`
    pub fn find(&self, page_no: PageNo, visible_upto: FrameNo) -> Option<FrameNo> {
        self.index.find(page_no, visible_upto)
    }

    /// Database size in pages as of the newest commit `<= visible_upto`
    pub fn logical_size(&self, visible_upto: FrameNo) -> u32 {
        self.index.db_size(visible_upto)
    }

    /// Locate frame `frame_no` on disk
    pub fn locate(&self, frame_no: FrameNo) -> Result<FrameLocation> {
        let located = match self.header {
            Some(h) => self.index.page_of(frame_no).map(|page_no| (h, page_no)),
            None => None,
        };
        let (header, page_no) = match located {
            Some(found) => found,
            None => {
                return Err(WalError::Misuse(format!(
                    "frame {} is not in the log (max_frame={})",
                    frame_no,
                    self.max_frame()
                )))
            }
        };
        Ok(FrameLocation {
            frame_no,
            page_no,
            offset: frame_offset(frame_no, header.page_size),
            page_size: header.page_size,
            salt: header.salt,
        })
    }

    /// Copy a frame's page bytes into `out`
    pub fn read(&self, frame_no: FrameNo, out: &mut [u8]) -> Result<()> {
        let location = self.locate(frame_no)?;
        Self::read_located(self.file.as_ref(), &location, out)
    }

    /// Read a located frame without access to the store
    pub fn read_located(
        file: &dyn StorageFile,
        location: &FrameLocation,
        out: &mut [u8],
    ) -> Result<()> {
        if out.len() != location.page_size as usize {
            return Err(WalError::Misuse(format!(
                "read buffer is {} bytes, page size is {}",
                out.len(),
                location.page_size
            )));
        }

        let mut header_buf = [0u8; FRAME_HEADER_SIZE];
        file.read_at(location.offset, &mut header_buf)
            .map_err(|e| truncated_frame(e, location.frame_no))?;
        let header = FrameHeader::decode(&header_buf)?;
        if header.salt != location.salt {
            return Err(WalError::Corrupt(format!(
                "frame {} carries a stale salt",
                location.frame_no
            )));
        }
        if header.page_no != location.page_no {
            return Err(WalError::Corrupt(format!(
                "frame {} holds page {} but the index expects page {}",
                location.frame_no, header.page_no, location.page_no
            )));
        }

        file.read_at(location.offset + FRAME_HEADER_SIZE as u64, out)
            .map_err(|e| truncated_frame(e, location.frame_no))?;
        Ok(())
    }

    // =========================================================================
    // Append
    // =========================================================================

    /// Append a single frame; see [`FrameStore::append_batch`]
    pub fn append(
        &mut self,
        page_size: u32,
        frame: &PageWrite,
        commit: Option<u32>,
    ) -> Result<FrameNo> {
        self.append_batch(page_size, std::slice::from_ref(frame), commit)
    }

    /// Append a batch, the last frame carrying `commit` if given
    ///
    /// Nothing is published unless the whole batch was written. Running
    /// out of log space also drops the uncommitted frames before it, so a
    /// partial transaction never survives in the log.
    pub fn append_batch(
        &mut self,
        page_size: u32,
        frames: &[PageWrite],
        commit: Option<u32>,
    ) -> Result<FrameNo> {
        match self.try_append(page_size, frames, commit) {
            Err(e @ WalError::CapacityExceeded(_)) => {
                self.rewind_to_commit()?;
                Err(e)
            }
            outcome => outcome,
        }
    }

    fn try_append(
        &mut self,
        page_size: u32,
        frames: &[PageWrite],
        commit: Option<u32>,
    ) -> Result<FrameNo> {
        let plan = self.prepare(page_size, frames, commit)?;
        Self::write_plan(self.file.as_ref(), &plan)?;
        self.publish(plan)
    }

    /// Validate and encode a batch without touching the store
    pub fn prepare(
        &self,
        page_size: u32,
        frames: &[PageWrite],
        commit: Option<u32>,
    ) -> Result<AppendPlan> {
        if frames.is_empty() {
            return Err(WalError::Misuse("empty frame batch".to_string()));
        }
        if !is_valid_page_size(page_size) {
            return Err(WalError::Misuse(format!("illegal page size {}", page_size)));
        }
        if let Some(fixed) = self.page_size() {
            if fixed != page_size {
                return Err(WalError::Misuse(format!(
                    "page size {} differs from the log's page size {}",
                    page_size, fixed
                )));
            }
        }
        if commit == Some(0) {
            return Err(WalError::Misuse(
                "commit frames must record a database size of at least 1 page".to_string(),
            ));
        }
        for frame in frames {
            if frame.page_no == 0 {
                return Err(WalError::Misuse("page numbers start at 1".to_string()));
            }
            if frame.data.len() != page_size as usize {
                return Err(WalError::Misuse(format!(
                    "page {} image is {} bytes, page size is {}",
                    frame.page_no,
                    frame.data.len(),
                    page_size
                )));
            }
        }

        let first_frame = self.max_frame() + 1;
        let frame_bytes = frames.len() as u64 * frame_size(page_size);
        let end = frame_offset(first_frame, page_size) + frame_bytes;
        if let Some(limit) = self.max_log_size {
            if end > limit {
                return Err(WalError::CapacityExceeded(format!(
                    "log would grow to {} bytes (limit {})",
                    end, limit
                )));
            }
        }

        let mut bytes = Vec::new();
        let (new_header, offset, mut checksum) = match self.header {
            Some(_) => (None, frame_offset(first_frame, page_size), self.tail_checksum),
            None => {
                let header = LogHeader::new(page_size, self.checkpoint_seq, self.next_salt);
                bytes.try_reserve(LOG_HEADER_SIZE)?;
                bytes.extend_from_slice(&header.encode()?);
                (Some(header), 0, header.checksum()?)
            }
        };
        let salt = new_header.or(self.header).map(|h| h.salt).unwrap_or_default();

        bytes.try_reserve(frame_bytes as usize)?;
        let mut pages = Vec::new();
        pages.try_reserve(frames.len())?;

        let last = frames.len() - 1;
        for (i, frame) in frames.iter().enumerate() {
            let db_size = if i == last { commit.unwrap_or(0) } else { 0 };
            checksum = encode_frame(&mut bytes, checksum, frame.page_no, db_size, salt, &frame.data)?;
            pages.push(frame.page_no);
        }

        Ok(AppendPlan {
            offset,
            bytes,
            new_header,
            first_frame,
            pages,
            commit,
            tail_checksum: checksum,
        })
    }

    /// Write a prepared plan to the log file
    pub fn write_plan(file: &dyn StorageFile, plan: &AppendPlan) -> Result<()> {
        file.write_at(plan.offset, &plan.bytes)
    }

    /// Make a written plan part of the log; returns the last frame number
    pub fn publish(&mut self, plan: AppendPlan) -> Result<FrameNo> {
        if plan.first_frame != self.max_frame() + 1 {
            return Err(WalError::Corrupt(format!(
                "append plan starts at frame {} but the log ends at {}",
                plan.first_frame,
                self.max_frame()
            )));
        }

        if let Some(header) = plan.new_header {
            let seed = header.checksum()?;
            self.header = Some(header);
            self.next_salt = header.salt.wrapping_add(1);
            self.tail_checksum = seed;
            self.commit_checksum = seed;
        }

        for (i, &page_no) in plan.pages.iter().enumerate() {
            self.index.insert(page_no, plan.first_frame + i as u64);
        }
        let last = plan.last_frame();
        self.tail_checksum = plan.tail_checksum;

        if let Some(db_size) = plan.commit {
            self.index.record_commit(last, db_size);
            self.commit_checksum = plan.tail_checksum;
            if self.fixed_page_size.is_none() {
                self.fixed_page_size = self.header.map(|h| h.page_size);
            }
        }

        tracing::trace!(
            "Published frames {}..={} (commit={:?})",
            plan.first_frame,
            last,
            plan.commit
        );
        Ok(last)
    }

    // =========================================================================
    // Rewind and Reset
    // =========================================================================

    /// Drop every frame after `frame_no`
    ///
    /// Rewinding below the last commit is refused; committed frames are
    /// only removed by a log reset.
    pub fn rewind_to(&mut self, frame_no: FrameNo) -> Result<()> {
        if frame_no < self.last_commit() {
            return Err(WalError::Misuse(format!(
                "cannot rewind to frame {} below the last commit {}",
                frame_no,
                self.last_commit()
            )));
        }
        if frame_no >= self.max_frame() {
            return Ok(());
        }

        let header = match self.header {
            Some(h) => h,
            None => return Ok(()),
        };

        if frame_no == 0 && self.fixed_page_size.is_none() {
            // Nothing was ever committed; forget the header with the frames
            self.file.truncate(0)?;
            self.header = None;
            self.index.clear();
            self.tail_checksum = 0;
            self.commit_checksum = 0;
            return Ok(());
        }

        let checksum = if frame_no == 0 {
            header.checksum()?
        } else if frame_no == self.last_commit() {
            self.commit_checksum
        } else {
            self.stored_checksum(frame_no, &header)?
        };

        self.file.truncate(frame_end(frame_no, header.page_size))?;
        self.index.truncate_after(frame_no);
        self.tail_checksum = checksum;
        tracing::trace!("Rewound log to frame {}", frame_no);
        Ok(())
    }

    /// Drop every uncommitted frame
    pub fn rewind_to_commit(&mut self) -> Result<()> {
        self.rewind_to(self.last_commit())
    }

    /// Start a fresh sequence space, keeping the file allocated
    ///
    /// A new header (new salt, next checkpoint sequence) is written at once;
    /// stale frames past it fail salt validation on recovery.
    pub fn restart(&mut self) -> Result<()> {
        let page_size = match self.page_size() {
            Some(p) => p,
            None => return Ok(()),
        };
        let header = self.next_header(page_size);
        self.file.write_at(0, &header.encode()?)?;
        self.file.sync()?;
        self.install_empty(Some(header))
    }

    /// Start a fresh sequence space and shrink the file to zero bytes
    pub fn truncate(&mut self) -> Result<()> {
        self.file.truncate(0)?;
        self.file.sync()?;
        if let Some(h) = self.header {
            self.checkpoint_seq = h.checkpoint_seq.wrapping_add(1);
        }
        self.install_empty(None)
    }

    /// Flush the log file
    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn next_header(&mut self, page_size: u32) -> LogHeader {
        let seq = self
            .header
            .map(|h| h.checkpoint_seq.wrapping_add(1))
            .unwrap_or(self.checkpoint_seq);
        LogHeader::new(page_size, seq, self.next_salt)
    }

    fn install_empty(&mut self, header: Option<LogHeader>) -> Result<()> {
        let seed = match &header {
            Some(h) => h.checksum()?,
            None => 0,
        };
        if let Some(h) = &header {
            self.checkpoint_seq = h.checkpoint_seq;
        }
        self.header = header;
        self.index.clear();
        self.tail_checksum = seed;
        self.commit_checksum = seed;
        self.next_salt = self.next_salt.wrapping_add(1);
        Ok(())
    }

    fn stored_checksum(&self, frame_no: FrameNo, header: &LogHeader) -> Result<u32> {
        if frame_no == 0 {
            return header.checksum();
        }
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        self.file
            .read_at(frame_offset(frame_no, header.page_size), &mut buf)
            .map_err(|e| truncated_frame(e, frame_no))?;
        Ok(FrameHeader::decode(&buf)?.checksum)
    }
}

impl std::fmt::Debug for FrameStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameStore")
            .field("header", &self.header)
            .field("max_frame", &self.max_frame())
            .field("last_commit", &self.last_commit())
            .finish()
    }
}

/// Byte offset just past frame `frame_no` (header end for frame 0)
fn frame_end(frame_no: FrameNo, page_size: u32) -> u64 {
    LOG_HEADER_SIZE as u64 + frame_no * frame_size(page_size)
}

/// A frame the index knows about but the file cannot supply is corruption
fn truncated_frame(err: WalError, frame_no: FrameNo) -> WalError {
    match err {
        WalError::Io(ref io) if io.kind() == ErrorKind::UnexpectedEof => {
            WalError::Corrupt(format!("frame {} is truncated in the log file", frame_no))
        }
        other => other,
    }
}

fn initial_salt() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5eed_0f_1065)
}
