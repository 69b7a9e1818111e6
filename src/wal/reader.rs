//! Log Reader
//!
//! Sequential scan over the valid frames of a log file.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Result, WalError};
use crate::vfs::StorageFile;

use super::frame::{frame_offset, frame_size, Frame, FrameHeader, LogHeader};
use super::frame::{FRAME_HEADER_SIZE, LOG_HEADER_SIZE, LOG_MAGIC};
use super::FrameNo;

/// Reads frames from a log file in order
///
/// The scan stops at the first frame that is torn, carries a stale salt or
/// breaks the checksum chain. Everything before that point is valid.
pub struct LogReader {
    file: Arc<dyn StorageFile>,
    /// `None` when the file holds no (complete) header
    header: Option<LogHeader>,
    /// Number the next frame will have
    next_frame: FrameNo,
    /// Checksum of the last valid frame (or of the header)
    prev_checksum: u32,
    /// File length at open
    end: u64,
    /// Byte offset just past the last valid frame
    valid_up_to: u64,
    /// Set once the scan hit the end of valid frames
    done: bool,
}

impl LogReader {
    /// Open a log for reading
    ///
    /// An empty file, or one whose header was torn mid-write, reads as an
    /// empty log. A header with the right magic and checksum but illegal
    /// contents is `Corrupt`; so is a file that is not a log at all.
    pub fn open(file: Arc<dyn StorageFile>) -> Result<Self> {
        let end = file.len()?;

        let mut reader = Self {
            file,
            header: None,
            next_frame: 1,
            prev_checksum: 0,
            end,
            valid_up_to: 0,
            done: true,
        };

        if end == 0 {
            return Ok(reader);
        }

        let mut buf = [0u8; LOG_HEADER_SIZE];
        let available = end.min(LOG_HEADER_SIZE as u64) as usize;
        reader.file.read_at(0, &mut buf[..available])?;

        if !LogHeader::has_magic(&buf[..available]) {
            if available < LOG_MAGIC.len() && buf[..available] == LOG_MAGIC[..available] {
                return Ok(reader);
            }
            return Err(WalError::Corrupt("file is not a vwal log".to_string()));
        }
        if available < LOG_HEADER_SIZE || !LogHeader::checksum_matches(&buf) {
            tracing::warn!("Log header torn (len={}), treating log as empty", end);
            return Ok(reader);
        }

        let header = LogHeader::decode(&buf)?;
        reader.prev_checksum = header.checksum()?;
        reader.header = Some(header);
        reader.valid_up_to = LOG_HEADER_SIZE as u64;
        reader.done = false;
        Ok(reader)
    }

    /// The log header, if the log has one
    pub fn header(&self) -> Option<&LogHeader> {
        self.header.as_ref()
    }

    /// Read the next valid frame, or `None` at the end of valid frames
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.done {
            return Ok(None);
        }
        let header = match self.header {
            Some(h) => h,
            None => return Ok(None),
        };

        let offset = frame_offset(self.next_frame, header.page_size);
        let size = frame_size(header.page_size);
        if offset + size > self.end {
            self.done = true;
            return Ok(None);
        }

        let mut buf = vec![0u8; size as usize];
        self.file.read_at(offset, &mut buf)?;

        let frame_header = FrameHeader::decode(&buf)?;
        if frame_header.salt != header.salt {
            // Leftover from before the last log reset
            self.done = true;
            return Ok(None);
        }

        let payload = &buf[FRAME_HEADER_SIZE..];
        let expected = frame_header.expected_checksum(self.prev_checksum, payload)?;
        if expected != frame_header.checksum {
            self.done = true;
            return Ok(None);
        }

        if frame_header.page_no == 0 {
            return Err(WalError::Corrupt(format!(
                "frame {} passed its checksum but names page 0",
                self.next_frame
            )));
        }

        let frame = Frame {
            frame_no: self.next_frame,
            page_no: frame_header.page_no,
            db_size: frame_header.db_size,
            data: Bytes::from(buf).slice(FRAME_HEADER_SIZE..),
        };

        self.prev_checksum = frame_header.checksum;
        self.next_frame += 1;
        self.valid_up_to = offset + size;
        Ok(Some(frame))
    }

    /// Iterate over all valid frames
    pub fn frames(self) -> LogIterator {
        LogIterator {
            reader: self,
            failed: false,
        }
    }

    /// Byte offset just past the last valid frame read so far
    pub fn valid_up_to(&self) -> u64 {
        self.valid_up_to
    }

    /// Chained checksum of the last valid frame read so far
    pub fn last_checksum(&self) -> u32 {
        self.prev_checksum
    }

    /// File length observed at open
    pub fn file_len(&self) -> u64 {
        self.end
    }
}

/// Iterator over log frames
pub struct LogIterator {
    reader: LogReader,
    failed: bool,
}

impl Iterator for LogIterator {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.reader.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
