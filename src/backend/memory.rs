//! In-memory WAL backend

use std::sync::Arc;

use crate::config::WalConfig;
use crate::connection::WalConnection;
use crate::error::Result;
use crate::shared::SharedLog;
use crate::vfs::{DbWriter, MemoryFile, StorageFile};

use super::{LogTable, WalBackend, WalMethods};

/// Ephemeral logs held in process memory
///
/// Connections opening the same name share one log. The log disappears
/// with its last connection.
pub struct MemoryBackend {
    logs: LogTable<String>,
}

impl MemoryBackend {
    pub const NAME: &'static str = "memory";

    pub fn new() -> Self {
        Self {
            logs: LogTable::new(),
        }
    }

    /// Open a connection to the log called `name`
    pub fn open_named(
        &self,
        name: &str,
        db: Arc<dyn DbWriter>,
        config: WalConfig,
    ) -> Result<WalConnection> {
        self.open_with(name, Arc::new(MemoryFile::new()), db, config)
    }

    /// Open a connection to `name`, backing a newly created log with `file`
    ///
    /// `file` is ignored when the log is already open.
    pub fn open_with(
        &self,
        name: &str,
        file: Arc<MemoryFile>,
        db: Arc<dyn DbWriter>,
        config: WalConfig,
    ) -> Result<WalConnection> {
        config.validate()?;
        let shared = self.logs.get_or_open(name.to_string(), || {
            let file: Arc<dyn StorageFile> = file;
            SharedLog::open(name, file)
        })?;
        WalConnection::open(shared, db, config, Self::NAME)
    }

    /// Number of logs with live connections
    pub fn open_logs(&self) -> usize {
        self.logs.live()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl WalBackend for MemoryBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn open(
        &self,
        target: &str,
        db: Arc<dyn DbWriter>,
        config: WalConfig,
    ) -> Result<Box<dyn WalMethods>> {
        let conn = self.open_named(target, db, config)?;
        Ok(Box::new(conn))
    }
}
