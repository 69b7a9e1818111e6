//! Main database file
//!
//! The checkpointer's view of the database: pages addressed by number.

use std::sync::Arc;

use crate::error::{Result, WalError};
use crate::wal::PageNo;

use super::StorageFile;

/// Destination of checkpoint backfill
pub trait DbWriter: Send + Sync {
    /// Write one page image; called at most once per page per checkpoint
    fn write_page(&self, page_no: PageNo, data: &[u8]) -> Result<()>;

    /// Resize the database to `pages` pages of `page_size` bytes
    fn set_page_count(&self, pages: u32, page_size: usize) -> Result<()>;

    /// Flush the database durably
    fn sync(&self) -> Result<()>;
}

/// A page-addressed database file over any [`StorageFile`]
///
/// Page `n` (1-based) lives at byte offset `(n - 1) * page_size`.
pub struct DbFile {
    file: Arc<dyn StorageFile>,
}

impl DbFile {
    pub fn new(file: Arc<dyn StorageFile>) -> Self {
        Self { file }
    }

    /// Read page `page_no` into `buf` (sized to the page size)
    pub fn read_page(&self, page_no: PageNo, buf: &mut [u8]) -> Result<()> {
        let offset = Self::offset(page_no, buf.len())?;
        self.file.read_at(offset, buf)
    }

    /// Number of whole pages currently in the file
    pub fn page_count(&self, page_size: usize) -> Result<u32> {
        if page_size == 0 {
            return Err(WalError::Misuse("page size must be non-zero".to_string()));
        }
        Ok((self.file.len()? / page_size as u64) as u32)
    }

    /// Underlying storage file
    pub fn file(&self) -> &Arc<dyn StorageFile> {
        &self.file
    }

    fn offset(page_no: PageNo, page_size: usize) -> Result<u64> {
        if page_no == 0 {
            return Err(WalError::Misuse("page numbers start at 1".to_string()));
        }
        Ok((page_no as u64 - 1) * page_size as u64)
    }
}

impl DbWriter for DbFile {
    fn write_page(&self, page_no: PageNo, data: &[u8]) -> Result<()> {
        let offset = Self::offset(page_no, data.len())?;
        self.file.write_at(offset, data)
    }

    fn set_page_count(&self, pages: u32, page_size: usize) -> Result<()> {
        self.file.truncate(pages as u64 * page_size as u64)
    }

    fn sync(&self) -> Result<()> {
        self.file.sync()
    }
}
