//! Tests for the read coordinator
//!
//! These tests verify:
//! - Read marks capture the newest commit
//! - Change detection across snapshots
//! - The read state machine (misuse cases)
//! - Marks are released on end, drop and detach

use std::sync::Arc;

use vwal::coordinator::{ReadCoordinator, WriteCoordinator};
use vwal::shared::{ConnId, SharedLog};
use vwal::vfs::{MemoryFile, StorageFile};
use vwal::{PageWrite, WalError, WalSyncStrategy};

const PAGE: u32 = 512;

// =============================================================================
// Helper Functions
// =============================================================================

fn shared_log() -> Arc<SharedLog> {
    let file: Arc<dyn StorageFile> = Arc::new(MemoryFile::new());
    SharedLog::open("read-tests", file).unwrap()
}

fn reader(shared: &Arc<SharedLog>) -> (ConnId, ReadCoordinator) {
    let conn = shared.attach();
    (conn, ReadCoordinator::new(Arc::clone(shared), conn))
}

fn writer(shared: &Arc<SharedLog>) -> WriteCoordinator {
    let conn = shared.attach();
    WriteCoordinator::new(Arc::clone(shared), conn, WalSyncStrategy::Never, None)
}

/// Commit one frame per page in `pages`; returns the commit frame
fn commit(writer: &mut WriteCoordinator, pages: &[u32]) -> u64 {
    let frames: Vec<PageWrite> = pages
        .iter()
        .map(|&p| PageWrite::new(p, vec![p as u8; PAGE as usize]))
        .collect();
    writer.begin_write(None).unwrap();
    let last = writer
        .append_frames(PAGE, &frames, pages.len() as u32, true)
        .unwrap();
    writer.end_write().unwrap();
    last
}

// =============================================================================
// Read Mark Tests
// =============================================================================

#[test]
fn test_begin_read_on_empty_log() {
    let shared = shared_log();
    let (conn, mut read) = reader(&shared);

    assert!(read.begin_read().unwrap());
    assert_eq!(read.mark(), Some(0));
    assert_eq!(shared.lock().read_marks.get(&conn), Some(&0));
}

#[test]
fn test_mark_is_last_commit() {
    let shared = shared_log();
    let mut write = writer(&shared);
    commit(&mut write, &[1, 2]);
    commit(&mut write, &[3]);

    let (_, mut read) = reader(&shared);
    read.begin_read().unwrap();
    assert_eq!(read.mark(), Some(3));
}

#[test]
fn test_mark_ignores_uncommitted_frames() {
    let shared = shared_log();
    let mut write = writer(&shared);
    commit(&mut write, &[1]);

    write.begin_write(None).unwrap();
    write
        .append_frames(PAGE, &[PageWrite::new(2, vec![0u8; PAGE as usize])], 0, false)
        .unwrap();

    let (_, mut read) = reader(&shared);
    read.begin_read().unwrap();
    assert_eq!(read.mark(), Some(1));
}

// =============================================================================
// Change Detection Tests
// =============================================================================

#[test]
fn test_changed_only_after_commit() {
    let shared = shared_log();
    let mut write = writer(&shared);
    let (_, mut read) = reader(&shared);

    assert!(read.begin_read().unwrap());
    read.end_read().unwrap();

    assert!(!read.begin_read().unwrap());
    read.end_read().unwrap();

    commit(&mut write, &[1]);
    assert!(read.begin_read().unwrap());
    read.end_read().unwrap();

    assert!(!read.begin_read().unwrap());
}

// =============================================================================
// State Machine Tests
// =============================================================================

#[test]
fn test_double_begin_read_is_misuse() {
    let shared = shared_log();
    let (_, mut read) = reader(&shared);

    read.begin_read().unwrap();
    assert!(matches!(read.begin_read(), Err(WalError::Misuse(_))));
    assert!(read.is_active());
}

#[test]
fn test_end_read_without_begin_is_misuse() {
    let shared = shared_log();
    let (_, mut read) = reader(&shared);

    assert!(matches!(read.end_read(), Err(WalError::Misuse(_))));

    read.begin_read().unwrap();
    read.end_read().unwrap();
    assert!(matches!(read.end_read(), Err(WalError::Misuse(_))));
}

#[test]
fn test_begin_read_busy_under_foreign_exclusive_mode() {
    let shared = shared_log();
    let (conn, mut read) = reader(&shared);

    shared.lock().exclusive = Some(conn + 100);
    assert!(matches!(read.begin_read(), Err(WalError::Busy(_))));
    assert!(!read.is_active());

    // Our own exclusive mode does not block us
    shared.lock().exclusive = Some(conn);
    assert!(read.begin_read().is_ok());
}

// =============================================================================
// Release Tests
// =============================================================================

#[test]
fn test_end_read_releases_mark() {
    let shared = shared_log();
    let (_, mut read) = reader(&shared);

    read.begin_read().unwrap();
    read.end_read().unwrap();

    assert!(shared.lock().read_marks.is_empty());
    assert_eq!(read.mark(), None);
}

#[test]
fn test_drop_releases_mark() {
    let shared = shared_log();
    {
        let (_, mut read) = reader(&shared);
        read.begin_read().unwrap();
        assert_eq!(shared.lock().read_marks.len(), 1);
    }
    assert!(shared.lock().read_marks.is_empty());
}

#[test]
fn test_oldest_mark() {
    let shared = shared_log();
    let mut write = writer(&shared);

    let (_, mut old) = reader(&shared);
    commit(&mut write, &[1]);
    old.begin_read().unwrap();

    commit(&mut write, &[2]);
    let (_, mut new) = reader(&shared);
    new.begin_read().unwrap();

    assert_eq!(shared.lock().oldest_mark(), Some(1));
    old.end_read().unwrap();
    assert_eq!(shared.lock().oldest_mark(), Some(2));
    new.end_read().unwrap();
    assert_eq!(shared.lock().oldest_mark(), None);
}

#[test]
fn test_detach_forgets_mark() {
    let shared = shared_log();
    let (conn, mut read) = reader(&shared);
    read.begin_read().unwrap();

    assert_eq!(shared.connections(), 1);
    assert_eq!(shared.detach(conn), 0);
    assert!(shared.lock().read_marks.is_empty());
}
