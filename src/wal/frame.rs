//! Log frame definitions
//!
//! Defines the log header, frame headers and the chained checksum that ties
//! frames to their predecessors.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WalError};

use super::{FrameNo, PageNo};

/// Magic bytes at the start of every log file
pub const LOG_MAGIC: [u8; 4] = *b"VWAL";

/// On-disk format version
pub const LOG_VERSION: u16 = 1;

/// Log header size on disk (fields + crc + padding)
pub const LOG_HEADER_SIZE: usize = 32;

/// Frame header size on disk (fields + checksum + padding)
pub const FRAME_HEADER_SIZE: usize = 24;

/// Smallest legal page size
pub const MIN_PAGE_SIZE: u32 = 512;

/// Largest legal page size
pub const MAX_PAGE_SIZE: u32 = 65536;

/// bincode size of [`LogHeader`]: 4 + 2 + 4 + 4 + 8
const LOG_HEADER_FIELDS: usize = 22;

/// bincode size of [`FrameFields`]: 4 + 4 + 8
const FRAME_HEADER_FIELDS: usize = 16;

/// Page sizes are powers of two between 512 and 65536
pub fn is_valid_page_size(page_size: u32) -> bool {
    page_size.is_power_of_two() && (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size)
}

/// Bytes one frame occupies on disk
pub fn frame_size(page_size: u32) -> u64 {
    FRAME_HEADER_SIZE as u64 + page_size as u64
}

/// Byte offset of frame `frame_no` (1-based)
pub fn frame_offset(frame_no: FrameNo, page_size: u32) -> u64 {
    LOG_HEADER_SIZE as u64 + (frame_no - 1) * frame_size(page_size)
}

// =============================================================================
// Log Header
// =============================================================================

/// Header at offset 0 of a log file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogHeader {
    pub magic: [u8; 4],
    pub version: u16,
    /// Page size shared by every frame in this log
    pub page_size: u32,
    /// Incremented by every log reset
    pub checkpoint_seq: u32,
    /// Stamped into every frame of this sequence space
    pub salt: u64,
}

impl LogHeader {
    pub fn new(page_size: u32, checkpoint_seq: u32, salt: u64) -> Self {
        Self {
            magic: LOG_MAGIC,
            version: LOG_VERSION,
            page_size,
            checkpoint_seq,
            salt,
        }
    }

    /// Encode to the fixed on-disk layout
    ///
    /// ```text
    /// ┌──────────┬─────────┬──────────┬─────────┬──────────┬─────────┬─────────┐
    /// │Magic (4) │ Ver (2) │ Page (4) │ Seq (4) │ Salt (8) │ CRC (4) │ Pad (6) │
    /// └──────────┴─────────┴──────────┴─────────┴──────────┴─────────┴─────────┘
    /// ```
    pub fn encode(&self) -> Result<[u8; LOG_HEADER_SIZE]> {
        let fields = bincode::serialize(self)?;
        if fields.len() != LOG_HEADER_FIELDS {
            return Err(WalError::Serialization(format!(
                "log header encoded to {} bytes, expected {}",
                fields.len(),
                LOG_HEADER_FIELDS
            )));
        }

        let mut buf = [0u8; LOG_HEADER_SIZE];
        buf[..LOG_HEADER_FIELDS].copy_from_slice(&fields);
        let crc = crc32fast::hash(&fields);
        buf[LOG_HEADER_FIELDS..LOG_HEADER_FIELDS + 4].copy_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Decode and validate a header
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < LOG_HEADER_SIZE {
            return Err(WalError::Corrupt(format!(
                "log header truncated: {} bytes",
                buf.len()
            )));
        }

        let fields = &buf[..LOG_HEADER_FIELDS];
        let stored_crc = read_u32(&buf[LOG_HEADER_FIELDS..LOG_HEADER_FIELDS + 4]);
        if crc32fast::hash(fields) != stored_crc {
            return Err(WalError::Corrupt("log header checksum mismatch".to_string()));
        }

        let header: LogHeader = bincode::deserialize(fields)?;
        if header.magic != LOG_MAGIC {
            return Err(WalError::Corrupt(format!(
                "invalid log magic: expected VWAL, got {:?}",
                header.magic
            )));
        }
        if header.version != LOG_VERSION {
            return Err(WalError::Corrupt(format!(
                "unsupported log version: {}",
                header.version
            )));
        }
        if !is_valid_page_size(header.page_size) {
            return Err(WalError::Corrupt(format!(
                "illegal page size in log header: {}",
                header.page_size
            )));
        }
        Ok(header)
    }

    /// Whether `buf` starts with the log magic
    pub fn has_magic(buf: &[u8]) -> bool {
        buf.len() >= 4 && buf[..4] == LOG_MAGIC
    }

    /// Whether the stored header checksum matches its fields
    pub fn checksum_matches(buf: &[u8]) -> bool {
        buf.len() >= LOG_HEADER_SIZE
            && crc32fast::hash(&buf[..LOG_HEADER_FIELDS])
                == read_u32(&buf[LOG_HEADER_FIELDS..LOG_HEADER_FIELDS + 4])
    }

    /// Seed of the frame checksum chain
    pub fn checksum(&self) -> Result<u32> {
        let fields = bincode::serialize(self)?;
        Ok(crc32fast::hash(&fields))
    }
}

// =============================================================================
// Frame Header
// =============================================================================

#[derive(Serialize, Deserialize)]
struct FrameFields {
    page_no: u32,
    db_size: u32,
    salt: u64,
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub page_no: PageNo,
    /// Database size in pages after this frame's transaction; 0 if not a commit
    pub db_size: u32,
    pub salt: u64,
    /// Chained checksum over the previous checksum, header fields and payload
    pub checksum: u32,
}

impl FrameHeader {
    pub fn is_commit(&self) -> bool {
        self.db_size > 0
    }

    /// Decode a frame header (without verifying the payload)
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(WalError::Corrupt(format!(
                "frame header truncated: {} bytes",
                buf.len()
            )));
        }
        let fields: FrameFields = bincode::deserialize(&buf[..FRAME_HEADER_FIELDS])?;
        Ok(Self {
            page_no: fields.page_no,
            db_size: fields.db_size,
            salt: fields.salt,
            checksum: read_u32(&buf[FRAME_HEADER_FIELDS..FRAME_HEADER_FIELDS + 4]),
        })
    }

    /// Recompute the chained checksum this frame should carry
    pub fn expected_checksum(&self, prev: u32, payload: &[u8]) -> Result<u32> {
        let fields = bincode::serialize(&FrameFields {
            page_no: self.page_no,
            db_size: self.db_size,
            salt: self.salt,
        })?;
        Ok(chain_checksum(prev, &fields, payload))
    }
}

/// Append one encoded frame (header + payload) to `out`
///
/// Returns the frame's chained checksum, which seeds the next frame.
pub fn encode_frame(
    out: &mut Vec<u8>,
    prev_checksum: u32,
    page_no: PageNo,
    db_size: u32,
    salt: u64,
    payload: &[u8],
) -> Result<u32> {
    let fields = bincode::serialize(&FrameFields {
        page_no,
        db_size,
        salt,
    })?;
    let checksum = chain_checksum(prev_checksum, &fields, payload);

    out.try_reserve(FRAME_HEADER_SIZE + payload.len())?;
    out.extend_from_slice(&fields);
    out.extend_from_slice(&checksum.to_le_bytes());
    out.extend_from_slice(&[0u8; FRAME_HEADER_SIZE - FRAME_HEADER_FIELDS - 4]);
    out.extend_from_slice(payload);
    Ok(checksum)
}

fn chain_checksum(prev: u32, fields: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&prev.to_le_bytes());
    hasher.update(fields);
    hasher.update(payload);
    hasher.finalize()
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}

// =============================================================================
// In-Memory Frames
// =============================================================================

/// One dirty page handed to the WAL by the pager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageWrite {
    pub page_no: PageNo,
    pub data: Bytes,
}

impl PageWrite {
    pub fn new(page_no: PageNo, data: impl Into<Bytes>) -> Self {
        Self {
            page_no,
            data: data.into(),
        }
    }
}

/// A frame read back from the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_no: FrameNo,
    pub page_no: PageNo,
    /// Database size after commit; 0 for non-commit frames
    pub db_size: u32,
    pub data: Bytes,
}

impl Frame {
    pub fn is_commit(&self) -> bool {
        self.db_size > 0
    }
}
