//! Transaction Coordinators
//!
//! Per-connection state machines over the shared log.
//!
//! ```text
//!   Read:   Idle ──begin_read──▶ ReadActive ──end_read──▶ Idle
//!   Write:  Idle ──begin_write─▶ WriteActive ──end_write─▶ Idle
//! ```
//!
//! The two machines are orthogonal: a writer usually holds a read mark on
//! the snapshot it is extending. Both release what they hold when dropped.

mod read;
mod write;

pub use read::ReadCoordinator;
pub use write::{Savepoint, WriteCoordinator};
