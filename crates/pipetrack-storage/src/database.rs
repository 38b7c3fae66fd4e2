// SPDX-FileCopyrightText: 2026 Pipetrack Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management: PRAGMA setup, WAL mode, schema
//! bootstrap, and the migration path on open.
//!
//! All statements execute on tokio-rusqlite's single background thread, so
//! closures passed to `call` never interleave. Mutating store operations
//! additionally serialize through the store-level lock in
//! [`crate::TransactionDb`].

use pipetrack_core::StoreError;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use crate::backup;
use crate::config::StoreConfig;
use crate::migrations::{self, MigrationPlan};
use crate::schema;

const MEMORY_PATH: &str = ":memory:";

/// Handle to one SQLite-backed transaction store.
///
/// Opening brings the schema current: missing tables are created at the
/// latest shape, and an outdated store is backed up and migrated before the
/// handle is returned. A failed migration is fatal to `open`.
pub struct Database {
    path: String,
    wal_mode: bool,
    conn: RwLock<Connection>,
}

impl Database {
    /// Open (and migrate if necessary) the store at `path` with default
    /// configuration and the shipped migration history.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let config = StoreConfig {
            database_path: path.to_string(),
            ..StoreConfig::default()
        };
        Self::open_with(&config, MigrationPlan::builtin()).await
    }

    /// Open the store described by `config`, applying `plan` when the
    /// persisted schema version is behind the plan's target.
    pub async fn open_with(config: &StoreConfig, plan: MigrationPlan) -> Result<Self, StoreError> {
        let path = config.database_path.clone();
        let wal_mode = config.wal_mode;
        let conn = open_raw(&path, wal_mode).await?;

        let target = plan.target_version();
        let existing = conn
            .call(move |conn| {
                schema::create_all(conn)?;
                let version = migrations::read_version(conn)?;
                if version.is_none() {
                    // First open of a fresh store: the tables were just
                    // created at the latest shape.
                    migrations::write_initial_version(conn, target)?;
                }
                Ok(version)
            })
            .await
            .map_err(map_call_err)?;

        if let Some(current) = existing.filter(|v| *v < target) {
            if path != MEMORY_PATH {
                let backup_db = path.clone();
                tokio::task::spawn_blocking(move || {
                    backup::create_pre_migration_backup(&backup_db, current)
                })
                .await
                .map_err(StoreError::storage)??;
            }
            info!(from = current, to = target, "migrating transaction store");
            conn.call(move |conn| migrations::run(conn, &plan, current).map_err(CallError::Domain))
                .await
                .map_err(map_call_err)?;
        }

        debug!(path = %path, "transaction store opened");
        Ok(Self {
            path,
            wal_mode,
            conn: RwLock::new(conn),
        })
    }

    /// Current connection handle. Cheap to clone; all calls funnel onto the
    /// same background thread.
    pub async fn connection(&self) -> Connection {
        self.conn.read().await.clone()
    }

    /// Ping the connection and re-establish it if the session dropped.
    ///
    /// Called by the retry wrapper between attempts. An in-memory store
    /// cannot be re-opened without losing its contents, so a dead memory
    /// connection surfaces as transient instead.
    pub async fn ensure_open(&self) -> Result<(), StoreError> {
        let conn = self.connection().await;
        let alive = conn
            .call(|conn| {
                conn.query_row("SELECT 1", [], |_| Ok(()))?;
                Ok(())
            })
            .await
            .map_err(map_call_err)
            .is_ok();
        if alive {
            return Ok(());
        }
        if self.path == MEMORY_PATH {
            return Err(StoreError::transient("in-memory store connection lost"));
        }
        info!(path = %self.path, "re-establishing storage connection");
        let fresh = open_raw(&self.path, self.wal_mode).await?;
        *self.conn.write().await = fresh;
        Ok(())
    }

    /// Checkpoint the WAL so the main database file is current on disk.
    pub async fn close(&self) -> Result<(), StoreError> {
        let conn = self.connection().await;
        conn.call(|conn| {
            // wal_checkpoint returns a result row, so step it via query_row.
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
            Ok(())
        })
        .await
        .map_err(map_call_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}

async fn open_raw(path: &str, wal_mode: bool) -> Result<Connection, StoreError> {
    let conn = Connection::open(path).await.map_err(classify_sqlite)?;
    conn.call(move |conn| {
        apply_pragmas(conn, wal_mode)?;
        Ok(())
    })
    .await
    .map_err(map_call_err)?;
    Ok(conn)
}

fn apply_pragmas(conn: &rusqlite::Connection, wal_mode: bool) -> rusqlite::Result<()> {
    if wal_mode {
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    }
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}

/// Error produced by closures running on the connection thread.
///
/// `?` converts raw rusqlite failures; domain errors ride the `From` impl
/// so they reach the caller with their classification intact.
#[derive(Debug, Error)]
pub(crate) enum CallError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Domain(#[from] StoreError),
}

/// Map a `call` failure back into the domain taxonomy.
///
/// Busy/locked and closed-connection failures classify as transient and are
/// eligible for retry; domain errors come back unchanged.
pub(crate) fn map_call_err(err: tokio_rusqlite::Error<CallError>) -> StoreError {
    match err {
        tokio_rusqlite::Error::ConnectionClosed => StoreError::transient("connection closed"),
        tokio_rusqlite::Error::Error(CallError::Sqlite(e)) => classify_sqlite(e),
        tokio_rusqlite::Error::Error(CallError::Domain(e)) => e,
        other => StoreError::storage(other.to_string()),
    }
}

fn classify_sqlite(err: rusqlite::Error) -> StoreError {
    use rusqlite::ErrorCode;
    match &err {
        rusqlite::Error::SqliteFailure(ffi, _)
            if matches!(
                ffi.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) =>
        {
            StoreError::Transient {
                source: Box::new(err),
            }
        }
        _ => StoreError::Storage {
            source: Box::new(err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SCHEMA_VERSION;
    use tempfile::tempdir;

    async fn applied_version(db: &Database) -> i64 {
        db.connection()
            .await
            .call(|conn| Ok(migrations::read_version(conn)?))
            .await
            .map_err(map_call_err)
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn fresh_store_starts_at_current_version() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("fresh.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();

        assert_eq!(applied_version(&db).await, SCHEMA_VERSION);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn reopening_a_current_store_does_not_migrate() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("reopen.db");
        let path = db_path.to_str().unwrap();

        let db = Database::open(path).await.unwrap();
        db.close().await.unwrap();
        drop(db);

        let db = Database::open(path).await.unwrap();
        assert_eq!(applied_version(&db).await, SCHEMA_VERSION);
        // No backup was taken: the store was already current.
        let backup = backup::backup_path_for(path, SCHEMA_VERSION);
        assert!(!std::path::Path::new(&backup).exists());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn outdated_store_is_backed_up_and_migrated() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("old.db");
        let path = db_path.to_str().unwrap();

        // Fabricate a version-1 store with a legacy row.
        {
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
                 INSERT INTO transactions (processing_state) VALUES ('report');",
            )
            .unwrap();
        }

        let db = Database::open(path).await.unwrap();
        assert_eq!(applied_version(&db).await, SCHEMA_VERSION);

        let backup = backup::backup_path_for(path, 1);
        assert!(std::path::Path::new(&backup).exists());

        let progress: i64 = db
            .connection()
            .await
            .call(|conn| {
                Ok(conn.query_row(
                    "SELECT task_progress FROM transactions WHERE id = 1",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .map_err(map_call_err)
            .unwrap();
        assert_eq!(progress, 90);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn ensure_open_is_a_no_op_on_a_healthy_connection() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("healthy.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        db.ensure_open().await.unwrap();
        db.close().await.unwrap();
    }

    #[test]
    fn busy_errors_classify_as_transient() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".into()),
        );
        assert!(classify_sqlite(busy).is_transient());

        let misuse = rusqlite::Error::QueryReturnedNoRows;
        assert!(!classify_sqlite(misuse).is_transient());
    }

    #[test]
    fn call_failures_map_back_to_the_domain_taxonomy() {
        let domain = map_call_err(tokio_rusqlite::Error::Error(CallError::Domain(
            StoreError::not_found("transaction", 42),
        )));
        assert!(matches!(domain, StoreError::NotFound { .. }));

        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let mapped = map_call_err(tokio_rusqlite::Error::Error(CallError::from(busy)));
        assert!(mapped.is_transient());

        let closed = map_call_err(tokio_rusqlite::Error::ConnectionClosed);
        assert!(closed.is_transient());
    }
}
