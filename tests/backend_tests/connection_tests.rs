//! Tests for connections handed out by the shipped backends
//!
//! These tests verify:
//! - Both backends behave the same through `dyn WalMethods`
//! - Connections to one name or path share one log
//! - Committed frames survive a reopen of the file backend
//! - Close (with and without the closing checkpoint)
//! - Exclusive mode and size limits

use std::fs;
use std::sync::Arc;

use tempfile::TempDir;
use vwal::vfs::{DbFile, DbWriter, MemoryFile, OsFile, StorageFile};
use vwal::{
    CheckpointMode, ExclusiveOp, FileBackend, MemoryBackend, PageWrite, WalBackend, WalConfig,
    WalError, WalMethods, WalSyncStrategy,
};

const PAGE: u32 = 1024;

// =============================================================================
// Helper Functions
// =============================================================================

fn memory_db() -> Arc<dyn DbWriter> {
    let file: Arc<dyn StorageFile> = Arc::new(MemoryFile::new());
    Arc::new(DbFile::new(file))
}

fn config() -> WalConfig {
    WalConfig::builder()
        .sync_strategy(WalSyncStrategy::Never)
        .checkpoint_on_close(false)
        .build()
}

fn page(page_no: u32, fill: u8) -> PageWrite {
    PageWrite::new(page_no, vec![fill; PAGE as usize])
}

fn commit(conn: &mut dyn WalMethods, frames: &[PageWrite], db_size: u32) -> u64 {
    conn.begin_write().unwrap();
    let last = conn.append_frames(PAGE, frames, db_size, true).unwrap();
    conn.end_write().unwrap();
    last
}

/// Read `page_no` through `conn`'s current snapshot
fn read_page(conn: &dyn WalMethods, page_no: u32) -> Option<Vec<u8>> {
    let frame = conn.find_frame(page_no).unwrap()?;
    let mut buf = vec![0u8; PAGE as usize];
    conn.read_frame(frame, &mut buf).unwrap();
    Some(buf)
}

/// The same scenario against any backend
fn exercise(backend: &dyn WalBackend, target: &str) {
    let mut writer = backend.open(target, memory_db(), config()).unwrap();
    let mut reader = backend.open(target, memory_db(), config()).unwrap();
    assert_eq!(writer.name(), backend.name());

    reader.begin_read().unwrap();
    assert_eq!(reader.find_frame(1).unwrap(), None);
    assert_eq!(reader.db_size().unwrap(), 0);

    assert_eq!(commit(writer.as_mut(), &[page(1, 0x11), page(2, 0x22)], 2), 2);

    // The open snapshot does not move
    assert_eq!(reader.find_frame(1).unwrap(), None);
    reader.end_read().unwrap();

    assert!(reader.begin_read().unwrap());
    assert_eq!(read_page(&*reader, 2).unwrap(), vec![0x22; PAGE as usize]);
    assert_eq!(reader.db_size().unwrap(), 2);
    reader.end_read().unwrap();

    let result = writer.checkpoint(CheckpointMode::Passive, None).unwrap();
    assert_eq!(result.frames_in_log, 2);
    assert_eq!(result.frames_backfilled, 2);

    writer.close().unwrap();
    reader.close().unwrap();
}

// =============================================================================
// Backend Parity Tests
// =============================================================================

#[test]
fn test_memory_backend_scenario() {
    let backend = MemoryBackend::new();
    exercise(&backend, "scenario");
    assert_eq!(backend.open_logs(), 0);
}

#[test]
fn test_file_backend_scenario() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("scenario.vwal");
    let backend = FileBackend::new();

    exercise(&backend, path.to_str().unwrap());
    assert_eq!(backend.open_logs(), 0);
}

// =============================================================================
// Sharing Tests
// =============================================================================

#[test]
fn test_memory_logs_shared_by_name() {
    let backend = MemoryBackend::new();
    let a = backend.open_named("one", memory_db(), config()).unwrap();
    let b = backend.open_named("one", memory_db(), config()).unwrap();
    let c = backend.open_named("two", memory_db(), config()).unwrap();

    assert!(Arc::ptr_eq(a.shared(), b.shared()));
    assert!(!Arc::ptr_eq(a.shared(), c.shared()));
    assert_ne!(a.id(), b.id());
    assert_eq!(backend.open_logs(), 2);
    assert_eq!(a.shared().connections(), 2);
}

#[test]
fn test_memory_log_vanishes_with_last_connection() {
    let backend = MemoryBackend::new();
    {
        let mut conn = backend.open_named("gone", memory_db(), config()).unwrap();
        commit(&mut conn, &[page(1, 1)], 1);
    }
    assert_eq!(backend.open_logs(), 0);

    let mut conn = backend.open_named("gone", memory_db(), config()).unwrap();
    conn.begin_read().unwrap();
    assert_eq!(conn.find_frame(1).unwrap(), None);
}

#[test]
fn test_file_logs_shared_by_canonical_path() {
    let temp = TempDir::new().unwrap();
    fs::create_dir(temp.path().join("sub")).unwrap();
    let direct = temp.path().join("shared.vwal");
    let indirect = temp.path().join("sub").join("..").join("shared.vwal");
    let backend = FileBackend::new();

    let a = backend.open_path(&direct, memory_db(), config()).unwrap();
    let b = backend.open_path(&indirect, memory_db(), config()).unwrap();

    assert!(Arc::ptr_eq(a.shared(), b.shared()));
    assert_eq!(backend.open_logs(), 1);
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_file_backend_reopen_recovers_commits() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("reopen.vwal");

    {
        let backend = FileBackend::new();
        let mut conn = backend.open_path(&path, memory_db(), config()).unwrap();
        commit(&mut conn, &[page(1, 0xaa)], 1);
        commit(&mut conn, &[page(2, 0xbb)], 2);

        // Left uncommitted when the process "dies"
        conn.begin_write().unwrap();
        conn.append_frames(PAGE, &[page(3, 0xcc)], 0, false).unwrap();
        std::mem::forget(conn);
    }

    let backend = FileBackend::new();
    let mut conn = backend.open_path(&path, memory_db(), config()).unwrap();
    conn.begin_read().unwrap();

    assert_eq!(read_page(&conn, 1).unwrap(), vec![0xaa; PAGE as usize]);
    assert_eq!(read_page(&conn, 2).unwrap(), vec![0xbb; PAGE as usize]);
    assert_eq!(conn.find_frame(3).unwrap(), None);
    assert_eq!(conn.db_size().unwrap(), 2);
}

#[test]
fn test_rollback_after_truncate_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("after-truncate.vwal");

    {
        let backend = FileBackend::new();
        let mut conn = backend.open_path(&path, memory_db(), config()).unwrap();
        commit(&mut conn, &[page(1, 1)], 1);
        conn.checkpoint(CheckpointMode::Truncate, None).unwrap();

        conn.begin_write().unwrap();
        conn.append_frames(PAGE, &[page(1, 2)], 0, false).unwrap();
        conn.end_write().unwrap();

        commit(&mut conn, &[page(1, 3)], 1);
        conn.begin_read().unwrap();
        assert_eq!(conn.find_frame(1).unwrap(), Some(1));
    }

    let backend = FileBackend::new();
    let mut conn = backend.open_path(&path, memory_db(), config()).unwrap();
    conn.begin_read().unwrap();
    assert_eq!(read_page(&conn, 1).unwrap(), vec![3; PAGE as usize]);
    assert_eq!(conn.db_size().unwrap(), 1);
}

#[test]
fn test_close_truncates_log_into_database() {
    let temp = TempDir::new().unwrap();
    let log_path = temp.path().join("close.vwal");
    let db_path = temp.path().join("close.db");
    let db_file: Arc<dyn StorageFile> = Arc::new(OsFile::open(&db_path).unwrap());
    let db = Arc::new(DbFile::new(db_file));

    let backend = FileBackend::new();
    let closing = WalConfig::builder()
        .sync_strategy(WalSyncStrategy::Never)
        .checkpoint_on_close(true)
        .build();
    let mut conn = backend.open_path(&log_path, db.clone(), closing).unwrap();
    commit(&mut conn, &[page(1, 7), page(2, 8), page(3, 9)], 3);
    conn.close().unwrap();

    assert_eq!(fs::metadata(&log_path).unwrap().len(), 0);
    assert_eq!(fs::metadata(&db_path).unwrap().len(), 3 * PAGE as u64);
    let mut buf = vec![0u8; PAGE as usize];
    db.read_page(3, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 9));
}

#[test]
fn test_close_skips_checkpoint_with_other_connections() {
    let backend = MemoryBackend::new();
    let log = Arc::new(MemoryFile::new());
    let closing = WalConfig::builder()
        .sync_strategy(WalSyncStrategy::Never)
        .checkpoint_on_close(true)
        .build();

    let mut a = backend
        .open_with("busy-close", Arc::clone(&log), memory_db(), closing.clone())
        .unwrap();
    let _b = backend
        .open_with("busy-close", Arc::clone(&log), memory_db(), closing)
        .unwrap();
    commit(&mut a, &[page(1, 1)], 1);
    let len = log.len().unwrap();

    a.close().unwrap();
    assert_eq!(log.len().unwrap(), len);
}

// =============================================================================
// Close Tests
// =============================================================================

#[test]
fn test_operations_after_close_are_misuse() {
    let backend = MemoryBackend::new();
    let mut conn = backend.open_named("closed", memory_db(), config()).unwrap();
    conn.close().unwrap();

    assert!(matches!(conn.begin_read(), Err(WalError::Misuse(_))));
    assert!(matches!(conn.begin_write(), Err(WalError::Misuse(_))));
    assert!(matches!(conn.find_frame(1), Err(WalError::Misuse(_))));
    assert!(matches!(
        conn.checkpoint(CheckpointMode::Passive, None),
        Err(WalError::Misuse(_))
    ));
    assert!(matches!(conn.close(), Err(WalError::Misuse(_))));
}

#[test]
fn test_close_releases_locks() {
    let backend = MemoryBackend::new();
    let mut a = backend.open_named("locks", memory_db(), config()).unwrap();
    let mut b = backend.open_named("locks", memory_db(), config()).unwrap();

    a.begin_read().unwrap();
    a.begin_write().unwrap();
    a.append_frames(PAGE, &[page(1, 1)], 0, false).unwrap();
    a.close().unwrap();

    // The write lock is free and the pending frame is gone
    b.begin_write().unwrap();
    assert_eq!(b.find_frame(1).unwrap(), None);
    assert!(b.shared().lock().read_marks.is_empty());
}

#[test]
fn test_lookup_without_transaction_is_misuse() {
    let backend = MemoryBackend::new();
    let conn = backend.open_named("idle", memory_db(), config()).unwrap();

    assert!(matches!(conn.find_frame(1), Err(WalError::Misuse(_))));
    assert!(matches!(conn.db_size(), Err(WalError::Misuse(_))));
}

#[test]
fn test_read_frame_beyond_snapshot_is_misuse() {
    let backend = MemoryBackend::new();
    let mut writer = backend.open_named("beyond", memory_db(), config()).unwrap();
    let mut reader = backend.open_named("beyond", memory_db(), config()).unwrap();

    commit(&mut writer, &[page(1, 1)], 1);
    reader.begin_read().unwrap();
    commit(&mut writer, &[page(1, 2)], 1);

    let mut buf = vec![0u8; PAGE as usize];
    assert!(matches!(reader.read_frame(2, &mut buf), Err(WalError::Misuse(_))));
    reader.read_frame(1, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 1));
}

#[test]
fn test_connection_sees_its_own_commit() {
    let backend = MemoryBackend::new();
    let mut conn = backend.open_named("own-commit", memory_db(), config()).unwrap();
    let mut other = backend.open_named("own-commit", memory_db(), config()).unwrap();

    conn.begin_read().unwrap();
    other.begin_read().unwrap();
    assert_eq!(commit(&mut conn, &[page(1, 0x5a)], 1), 1);

    // Still inside the same read transaction
    assert_eq!(conn.read_mark(), Some(1));
    assert_eq!(read_page(&conn, 1).unwrap(), vec![0x5a; PAGE as usize]);
    assert_eq!(conn.db_size().unwrap(), 1);
    assert_eq!(commit(&mut conn, &[page(2, 0x5b)], 2), 2);

    // Other snapshots do not move
    assert_eq!(other.find_frame(1).unwrap(), None);
    assert!(matches!(other.begin_write(), Err(WalError::Busy(_))));
}

// =============================================================================
// Exclusive Mode Tests
// =============================================================================

#[test]
fn test_exclusive_mode() {
    let backend = MemoryBackend::new();
    let mut a = backend.open_named("exclusive", memory_db(), config()).unwrap();
    let mut b = backend.open_named("exclusive", memory_db(), config()).unwrap();

    assert!(!a.exclusive_mode(ExclusiveOp::Query).unwrap());
    assert!(a.exclusive_mode(ExclusiveOp::Acquire).unwrap());
    assert!(a.exclusive_mode(ExclusiveOp::Query).unwrap());

    // Everyone else is locked out
    assert!(matches!(b.begin_read(), Err(WalError::Busy(_))));
    assert!(matches!(b.begin_write(), Err(WalError::Busy(_))));
    assert!(matches!(
        b.exclusive_mode(ExclusiveOp::Acquire),
        Err(WalError::Busy(_))
    ));

    // The holder works as usual
    commit(&mut a, &[page(1, 1)], 1);

    assert!(!a.exclusive_mode(ExclusiveOp::Release).unwrap());
    assert!(b.begin_read().unwrap());
}

#[test]
fn test_exclusive_mode_refused_with_readers() {
    let backend = MemoryBackend::new();
    let mut a = backend.open_named("crowded", memory_db(), config()).unwrap();
    let mut b = backend.open_named("crowded", memory_db(), config()).unwrap();

    b.begin_read().unwrap();
    assert!(matches!(
        a.exclusive_mode(ExclusiveOp::Acquire),
        Err(WalError::Busy(_))
    ));

    b.end_read().unwrap();
    assert!(a.exclusive_mode(ExclusiveOp::Acquire).unwrap());
}

// =============================================================================
// Limit and Notification Tests
// =============================================================================

#[test]
fn test_set_limit_bounds_log_growth() {
    let backend = MemoryBackend::new();
    let mut conn = backend.open_named("limited", memory_db(), config()).unwrap();
    commit(&mut conn, &[page(1, 1)], 1);

    conn.set_limit(Some(conn.file().len().unwrap()));
    conn.begin_write().unwrap();
    let result = conn.append_frames(PAGE, &[page(2, 2)], 2, true);
    assert!(matches!(result, Err(WalError::CapacityExceeded(_))));
    conn.end_write().unwrap();

    conn.set_limit(None);
    assert_eq!(commit(&mut conn, &[page(2, 2)], 2), 2);
}

#[test]
fn test_commit_subscription_across_connections() {
    let backend = MemoryBackend::new();
    let mut writer = backend.open_named("notify", memory_db(), config()).unwrap();
    let watcher = backend.open_named("notify", memory_db(), config()).unwrap();
    let commits = watcher.subscribe_commits();

    commit(&mut writer, &[page(1, 1)], 1);
    commit(&mut writer, &[page(2, 2), page(3, 3)], 3);

    assert_eq!(commits.try_iter().collect::<Vec<_>>(), vec![1, 3]);
}
