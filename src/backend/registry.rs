//! Backend registry
//!
//! Name → backend resolution for the host engine.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::WalConfig;
use crate::error::{Result, WalError};
use crate::vfs::DbWriter;

use super::{FileBackend, MemoryBackend, WalBackend, WalMethods};

/// Backends known to the host, by unique name
#[derive(Default)]
pub struct BackendRegistry {
    backends: RwLock<HashMap<String, Arc<dyn WalBackend>>>,
}

impl BackendRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the `file` and `memory` backends
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        let mut backends = registry.backends.write();
        backends.insert(FileBackend::NAME.to_string(), Arc::new(FileBackend::new()));
        backends.insert(MemoryBackend::NAME.to_string(), Arc::new(MemoryBackend::new()));
        drop(backends);
        registry
    }

    /// Register a backend under its own name
    pub fn register(&self, backend: Arc<dyn WalBackend>) -> Result<()> {
        let name = backend.name().to_string();
        let mut backends = self.backends.write();
        if backends.contains_key(&name) {
            return Err(WalError::Misuse(format!(
                "a WAL backend named {:?} is already registered",
                name
            )));
        }
        tracing::debug!("Registered WAL backend {}", name);
        backends.insert(name, backend);
        Ok(())
    }

    /// Look a backend up by name
    pub fn find(&self, name: &str) -> Option<Arc<dyn WalBackend>> {
        self.backends.read().get(name).cloned()
    }

    /// Open a connection through the backend called `backend`
    pub fn open(
        &self,
        backend: &str,
        target: &str,
        db: Arc<dyn DbWriter>,
        config: WalConfig,
    ) -> Result<Box<dyn WalMethods>> {
        let found = self
            .find(backend)
            .ok_or_else(|| WalError::UnknownBackend(backend.to_string()))?;
        found.open(target, db, config)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.read().keys().cloned().collect();
        names.sort();
        names
    }
}
