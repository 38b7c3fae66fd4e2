// SPDX-FileCopyrightText: 2026 Pipetrack Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Current table shapes and the schema version constants.
//!
//! `create_all` issues `CREATE TABLE IF NOT EXISTS` statements for the
//! latest shape. A freshly created store therefore starts at
//! [`SCHEMA_VERSION`] directly; pre-existing stores keep their old shape
//! and are brought current by the migration engine.

/// Fixed key of the singleton row in `schema_version`.
pub const SCHEMA_NAME: &str = "transactions";

/// Version the current table shapes correspond to. Strictly non-decreasing
/// over a store's lifetime; advanced only by the migration engine.
pub const SCHEMA_VERSION: i64 = 7;

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_state TEXT NOT NULL DEFAULT 'queued',
    processing_state TEXT,
    task_progress INTEGER NOT NULL DEFAULT 0,
    task_skipped INTEGER NOT NULL DEFAULT 0,
    task_cancelled INTEGER NOT NULL DEFAULT 0,
    archived INTEGER NOT NULL DEFAULT 0,
    status TEXT,
    institution TEXT,
    sequences TEXT,
    error TEXT,
    last_message TEXT,
    creation_date TEXT,
    start_date TEXT,
    end_date TEXT,
    patient_consent INTEGER NOT NULL DEFAULT 0,
    qa_score REAL,
    billable TEXT,
    priority INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS schema_version (
    name TEXT PRIMARY KEY,
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    hashed_password TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS roles (
    role_id TEXT PRIMARY KEY,
    description TEXT,
    permissions INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS user_roles (
    user_id INTEGER NOT NULL,
    role_id TEXT NOT NULL,
    PRIMARY KEY (user_id, role_id)
);

CREATE TABLE IF NOT EXISTS user_transactions (
    user_id INTEGER NOT NULL,
    transaction_id INTEGER NOT NULL,
    PRIMARY KEY (user_id, transaction_id)
);

CREATE TABLE IF NOT EXISTS user_preferences (
    user_id INTEGER PRIMARY KEY,
    language TEXT,
    timezone TEXT,
    notifications_enabled INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS studies_metadata (
    study_id TEXT PRIMARY KEY,
    origin TEXT,
    c_move_time TEXT
);

CREATE TABLE IF NOT EXISTS user_sites (
    user_id INTEGER NOT NULL,
    site_id INTEGER NOT NULL,
    PRIMARY KEY (user_id, site_id)
);
";

/// Create any missing tables at the latest shape. No-op for tables that
/// already exist, whatever their version.
pub fn create_all(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CREATE_TABLES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_all_is_idempotent() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        create_all(&conn).unwrap();
        create_all(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'transactions'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn fresh_transactions_default_to_queued() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        create_all(&conn).unwrap();
        conn.execute(
            "INSERT INTO transactions (processing_state) VALUES ('waiting')",
            [],
        )
        .unwrap();

        let (state, progress): (String, i64) = conn
            .query_row(
                "SELECT task_state, task_progress FROM transactions WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(state, "queued");
        assert_eq!(progress, 0);
    }
}
