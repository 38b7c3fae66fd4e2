// SPDX-FileCopyrightText: 2026 Pipetrack Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pre-migration backup of the database file.
//!
//! Uses rusqlite's Backup API for an atomic, consistent copy that works
//! even in WAL mode. The copy is tagged with the pre-migration schema
//! version so an operator can restore the exact shape a failed migration
//! started from.

use std::path::Path;
use std::time::Duration;

use pipetrack_core::StoreError;
use rusqlite::Connection;
use tracing::info;

/// Backup destination for `db_path` at the given pre-migration version.
pub fn backup_path_for(db_path: &str, version: i64) -> String {
    format!("{db_path}.v_{version}.bkp")
}

/// Copy the database file aside before migrating, returning the backup
/// path. Fails if the source file does not exist.
pub fn create_pre_migration_backup(db_path: &str, version: i64) -> Result<String, StoreError> {
    if !Path::new(db_path).exists() {
        return Err(StoreError::storage(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("database not found: {db_path}"),
        )));
    }

    let backup_path = backup_path_for(db_path, version);

    // Open source read-only to minimize impact on the running instance.
    let src = Connection::open_with_flags(
        db_path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(StoreError::storage)?;

    let mut dst = Connection::open(&backup_path).map_err(StoreError::storage)?;

    let backup = rusqlite::backup::Backup::new(&src, &mut dst).map_err(StoreError::storage)?;

    // Copy 100 pages per step, sleep 10ms between steps, so a concurrent
    // reader is not starved.
    backup
        .run_to_completion(100, Duration::from_millis(10), None)
        .map_err(StoreError::storage)?;

    info!(path = %backup_path, version, "created pre-migration backup");
    Ok(backup_path)
}
