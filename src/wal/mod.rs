//! Write-Ahead Log (WAL) Module
//!
//! The frame store: an append-only log of page images plus the index that
//! answers "newest version of page P visible at frame S".
//!
//! ## Responsibilities
//! - Append frames with chained CRC32 checksums
//! - Point lookups through the in-memory page index
//! - Rewind uncommitted tails and reset the sequence space
//! - Crash recovery: rebuild the index from committed frames
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Log Header (32)                                         │
//! │ ┌──────┬─────┬──────┬─────┬──────┬─────┬─────┐          │
//! │ │Magic │ Ver │ Page │ Seq │ Salt │ CRC │ Pad │          │
//! │ └──────┴─────┴──────┴─────┴──────┴─────┴─────┘          │
//! ├─────────────────────────────────────────────────────────┤
//! │ Frame 1                                                 │
//! │ ┌──────────┬──────────┬──────────┬─────────┬─────┬────┐ │
//! │ │ Page (4) │ Size (4) │ Salt (8) │ Sum (4) │ Pad │Data│ │
//! │ └──────────┴──────────┴──────────┴─────────┴─────┴────┘ │
//! ├─────────────────────────────────────────────────────────┤
//! │ Frame 2 ...                                             │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! `Size` is the database size in pages after the frame's transaction, and
//! is zero for every frame but the last one of a commit.

mod frame;
mod index;
mod reader;
mod recovery;
mod store;

/// 1-based page number in the main database file
pub type PageNo = u32;

/// 1-based frame sequence number within one log sequence space
pub type FrameNo = u64;

pub use frame::{
    encode_frame, frame_offset, frame_size, is_valid_page_size, Frame, FrameHeader, LogHeader, PageWrite,
    FRAME_HEADER_SIZE, LOG_HEADER_SIZE, LOG_MAGIC, LOG_VERSION, MAX_PAGE_SIZE, MIN_PAGE_SIZE,
};
pub use index::PageIndex;
pub use reader::{LogIterator, LogReader};
pub use recovery::{LogRecovery, RecoveredLog, RecoveryResult};
pub use store::{AppendPlan, FrameLocation, FrameStore};
