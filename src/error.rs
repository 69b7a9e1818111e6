//! Error types for vwal
//!
//! Provides a unified error type for all WAL operations, plus the
//! [`ResultCode`] status that a host engine surfaces to its callers.

use thiserror::Error;

/// Result type alias using WalError
pub type Result<T> = std::result::Result<T, WalError>;

/// Unified error type for vwal operations
#[derive(Debug, Error)]
pub enum WalError {
    // -------------------------------------------------------------------------
    // Contention
    // -------------------------------------------------------------------------
    /// Transient contention; always safe to retry.
    #[error("WAL busy: {0}")]
    Busy(String),

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Log Content Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    Corrupt(String),

    #[error("WAL size limit exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    /// The caller violated the read/write/checkpoint state machine.
    #[error("WAL misuse: {0}")]
    Misuse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown WAL backend: {0}")]
    UnknownBackend(String),

    // -------------------------------------------------------------------------
    // Resource Errors
    // -------------------------------------------------------------------------
    #[error("Out of memory: {0}")]
    NoMemory(String),
}

/// Status codes surfaced to the host engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Ok,
    Busy,
    IoError,
    Corrupt,
    CapacityExceeded,
    Misuse,
    NoMemory,
}

impl WalError {
    /// Map this error onto the host-facing status code
    pub fn code(&self) -> ResultCode {
        match self {
            WalError::Busy(_) => ResultCode::Busy,
            WalError::Io(_) => ResultCode::IoError,
            WalError::Corrupt(_) | WalError::Serialization(_) => ResultCode::Corrupt,
            WalError::CapacityExceeded(_) => ResultCode::CapacityExceeded,
            WalError::Misuse(_) | WalError::Config(_) | WalError::UnknownBackend(_) => {
                ResultCode::Misuse
            }
            WalError::NoMemory(_) => ResultCode::NoMemory,
        }
    }

    /// True for errors the caller is expected to retry
    pub fn is_busy(&self) -> bool {
        matches!(self, WalError::Busy(_))
    }
}

impl From<bincode::Error> for WalError {
    fn from(err: bincode::Error) -> Self {
        WalError::Serialization(err.to_string())
    }
}

impl From<std::collections::TryReserveError> for WalError {
    fn from(err: std::collections::TryReserveError) -> Self {
        WalError::NoMemory(err.to_string())
    }
}

/// Status code of an operation result
pub fn result_code<T>(result: &Result<T>) -> ResultCode {
    match result {
        Ok(_) => ResultCode::Ok,
        Err(e) => e.code(),
    }
}
