//! In-memory storage file
//!
//! Heap-backed [`StorageFile`] for ephemeral logs and tests. Writes can be
//! made to fail on demand to exercise error paths.

use std::io::{Error, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::Result;

use super::StorageFile;

/// A growable byte buffer that behaves like a file
#[derive(Default)]
pub struct MemoryFile {
    data: RwLock<Vec<u8>>,
    fail_writes: AtomicBool,
}

impl MemoryFile {
    /// Create an empty memory file
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `write_at`/`sync`/`truncate` fail with an I/O error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::Other, "injected write failure").into());
        }
        Ok(())
    }
}

impl StorageFile for MemoryFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.data.read();
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                format!("read of {}..{} past end {}", start, end, data.len()),
            )
            .into());
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&self, offset: u64, src: &[u8]) -> Result<()> {
        self.check_writable()?;
        let mut data = self.data.write();
        let start = offset as usize;
        let end = start + src.len();
        if end > data.len() {
            let extra = end - data.len();
            data.try_reserve(extra)?;
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(src);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.check_writable()
    }

    fn len(&self) -> Result<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.check_writable()?;
        self.data.write().resize(len as usize, 0);
        Ok(())
    }
}
