// SPDX-FileCopyrightText: 2026 Pipetrack Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end upgrade of a legacy version-1 store file.

use pipetrack_core::{TaskState, TransactionStore};
use pipetrack_storage::{backup, schema, Database, TransactionDb};

/// Lay down a store file exactly as the oldest deployments shipped it,
/// with a few rows caught mid-pipeline.
fn write_v1_store(path: &str) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE transactions (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             task_state TEXT NOT NULL DEFAULT 'queued',
             processing_state TEXT,
             archived INTEGER NOT NULL DEFAULT 0,
             error TEXT,
             last_message TEXT,
             creation_date TEXT,
             start_date TEXT,
             end_date TEXT
         );
         CREATE TABLE schema_version (name TEXT PRIMARY KEY, version INTEGER NOT NULL);
         INSERT INTO schema_version (name, version) VALUES ('transactions', 1);

         INSERT INTO transactions (task_state, processing_state)
             VALUES ('processing', 'report');
         INSERT INTO transactions (task_state, processing_state)
             VALUES ('completed', 'send_to_pacs');
         INSERT INTO transactions (task_state, processing_state)
             VALUES ('queued', 'waiting');",
    )
    .unwrap();
}

#[tokio::test]
async fn legacy_store_is_upgraded_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("legacy.db");
    let db_path = db_path.to_str().unwrap();
    write_v1_store(db_path);

    let store = TransactionDb::open(db_path).await.unwrap();

    // Progress was backfilled from the legacy stage labels.
    let report = store.get(1).await.unwrap();
    assert_eq!(report.task_state, TaskState::Processing);
    assert_eq!(report.task_progress, 90);
    assert_eq!(report.status.as_deref(), Some("unseen"));

    let sent = store.get(2).await.unwrap();
    assert_eq!(sent.task_progress, 100);
    assert_eq!(sent.status.as_deref(), Some("sent_to_pacs"));

    let waiting = store.get(3).await.unwrap();
    assert_eq!(waiting.task_progress, 0);
    assert_eq!(waiting.status.as_deref(), Some("unseen"));

    // Columns added after v5 exist at their defaults.
    assert!(!waiting.patient_consent);
    assert_eq!(waiting.priority, 0);
    assert!(waiting.qa_score.is_none());

    store.close().await.unwrap();
}

#[tokio::test]
async fn upgrade_writes_a_version_tagged_backup() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("legacy.db");
    let db_path = db_path.to_str().unwrap();
    write_v1_store(db_path);

    let store = TransactionDb::open(db_path).await.unwrap();
    store.close().await.unwrap();

    let backup_path = backup::backup_path_for(db_path, 1);
    assert!(std::path::Path::new(&backup_path).exists());

    // The copy still carries the pre-migration shape and data.
    let conn = rusqlite::Connection::open(&backup_path).unwrap();
    let version: i64 = conn
        .query_row(
            "SELECT version FROM schema_version WHERE name = 'transactions'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(version, 1);
    let columns: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM pragma_table_info('transactions') \
             WHERE name = 'task_progress'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(columns, 0);
}

#[tokio::test]
async fn reopening_a_current_store_neither_migrates_nor_backs_up() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("legacy.db");
    let db_path = db_path.to_str().unwrap();
    write_v1_store(db_path);

    let store = TransactionDb::open(db_path).await.unwrap();
    store.close().await.unwrap();
    let store = TransactionDb::open(db_path).await.unwrap();
    store.close().await.unwrap();

    // Only the first open found an outdated store.
    let current_backup = backup::backup_path_for(db_path, schema::SCHEMA_VERSION);
    assert!(!std::path::Path::new(&current_backup).exists());
}

#[tokio::test]
async fn fresh_store_starts_at_the_current_version_without_backup() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("fresh.db");
    let db_path = db_path.to_str().unwrap();

    let db = Database::open(db_path).await.unwrap();
    db.close().await.unwrap();

    let conn = rusqlite::Connection::open(db_path).unwrap();
    let version: i64 = conn
        .query_row(
            "SELECT version FROM schema_version WHERE name = 'transactions'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(version, schema::SCHEMA_VERSION);

    assert!(!std::path::Path::new(&backup::backup_path_for(db_path, 1)).exists());
}

#[tokio::test]
async fn upgraded_store_accepts_new_lifecycle_traffic() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("legacy.db");
    let db_path = db_path.to_str().unwrap();
    write_v1_store(db_path);

    let store = TransactionDb::open(db_path).await.unwrap();

    // The legacy queued row is still at the head of the queue.
    let head = store.peek(None).await.unwrap().unwrap();
    assert_eq!(head.id, 3);

    store.set_processing(3, "classifier", "{}", 25).await.unwrap();
    store.set_completed(3, true).await.unwrap();
    let done = store.get(3).await.unwrap();
    assert_eq!(done.task_state, TaskState::Completed);
    assert!(done.start_date.is_some());
    assert!(done.end_date.is_some());

    store.close().await.unwrap();
}
