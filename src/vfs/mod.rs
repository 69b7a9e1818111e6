//! Virtual File System Module
//!
//! The byte-level collaborators the WAL talks to.
//!
//! ## Responsibilities
//! - [`StorageFile`]: positioned reads/writes, durable flush, resize
//! - [`DbWriter`]: the main database file as seen by the checkpointer
//!
//! The WAL never assumes a concrete file API beyond these traits, so a log
//! can live on disk ([`OsFile`]) or in memory ([`MemoryFile`]) without the
//! frame store noticing.

mod db;
mod file;
mod memory;

pub use db::{DbFile, DbWriter};
pub use file::OsFile;
pub use memory::MemoryFile;

use crate::error::Result;

/// Positioned byte I/O over one file
pub trait StorageFile: Send + Sync {
    /// Fill `buf` from `offset`; a short read is an `UnexpectedEof` I/O error
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write all of `data` at `offset`, extending the file if needed
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Flush file contents to durable storage
    fn sync(&self) -> Result<()>;

    /// Current length in bytes
    fn len(&self) -> Result<u64>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Resize the file to exactly `len` bytes
    fn truncate(&self, len: u64) -> Result<()>;
}
