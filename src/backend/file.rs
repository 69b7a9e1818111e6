//! File-backed WAL backend

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::WalConfig;
use crate::connection::WalConnection;
use crate::error::Result;
use crate::shared::SharedLog;
use crate::vfs::{DbWriter, OsFile, StorageFile};

use super::{LogTable, WalBackend, WalMethods};

/// Logs stored as files on the local filesystem
///
/// Connections opening the same path (after canonicalization) share one
/// log. Coordination is per process.
pub struct FileBackend {
    logs: LogTable<PathBuf>,
}

impl FileBackend {
    pub const NAME: &'static str = "file";

    pub fn new() -> Self {
        Self {
            logs: LogTable::new(),
        }
    }

    /// Open a connection by path
    pub fn open_path(
        &self,
        path: &Path,
        db: Arc<dyn DbWriter>,
        config: WalConfig,
    ) -> Result<WalConnection> {
        config.validate()?;

        // The file must exist before its path can be canonicalized
        let file = OsFile::open(path)?;
        let key = path.canonicalize()?;

        let shared = self.logs.get_or_open(key.clone(), || {
            let file: Arc<dyn StorageFile> = Arc::new(file);
            SharedLog::open(key.display().to_string(), file)
        })?;
        WalConnection::open(shared, db, config, Self::NAME)
    }

    /// Number of logs with live connections
    pub fn open_logs(&self) -> usize {
        self.logs.live()
    }
}

impl Default for FileBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl WalBackend for FileBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn open(
        &self,
        target: &str,
        db: Arc<dyn DbWriter>,
        config: WalConfig,
    ) -> Result<Box<dyn WalMethods>> {
        let conn = self.open_path(Path::new(target), db, config)?;
        Ok(Box::new(conn))
    }
}
