//! # vwal
//!
//! A pluggable write-ahead log for an embedded page-based database:
//! - Append-only frame log with chained checksums
//! - Crash recovery that keeps exactly the committed frames
//! - Snapshot reads (many readers) over a single writer
//! - Checkpointing back into the main database file
//! - Backends selected by name behind one method-table trait
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Pager (host engine)                      │
//! │                  Box<dyn WalMethods> per pager               │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  BackendRegistry: "file" | "memory"
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     WalConnection                            │
//! │     ReadCoordinator    WriteCoordinator    Checkpointer      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  Arc<SharedLog> (one mutex)
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ FrameStore  │          │  DbWriter   │
//!   │ log + index │─────────▶│ (main file) │
//!   └──────┬──────┘backfill  └─────────────┘
//!          │
//!          ▼
//!   ┌─────────────┐
//!   │ StorageFile │
//!   │ OsFile/Mem  │
//!   └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod vfs;
pub mod wal;
pub mod shared;
pub mod coordinator;
pub mod checkpoint;
pub mod connection;
pub mod backend;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use backend::{BackendRegistry, ExclusiveOp, FileBackend, MemoryBackend, WalBackend, WalMethods};
pub use checkpoint::{BusyHandler, CheckpointMode, CheckpointResult};
pub use config::{WalConfig, WalSyncStrategy};
pub use connection::WalConnection;
pub use coordinator::Savepoint;
pub use error::{result_code, Result, ResultCode, WalError};
pub use wal::{FrameNo, PageNo, PageWrite};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of vwal
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
