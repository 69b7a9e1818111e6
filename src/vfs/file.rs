//! OS-backed storage file
//!
//! `std::fs::File` behind a mutex so seek + read/write pairs stay atomic.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::Result;

use super::StorageFile;

/// A file on the local filesystem
pub struct OsFile {
    /// Path the file was opened with (for logging)
    path: PathBuf,
    /// File handle; the lock covers the shared cursor
    file: Mutex<File>,
}

impl OsFile {
    /// Open a file for reading and writing, creating it if missing
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Get the path of this file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageFile for OsFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.file.lock().set_len(len)?;
        Ok(())
    }
}

impl std::fmt::Debug for OsFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OsFile").field("path", &self.path).finish()
    }
}
