// SPDX-FileCopyrightText: 2026 Pipetrack Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the pipetrack transaction database.
//!
//! Provides WAL-mode SQLite storage with a versioned schema-migration
//! engine, pre-migration backups, a single-writer concurrency model via
//! `tokio-rusqlite`, and typed lifecycle operations for the transaction
//! table plus auxiliary user/role/study CRUD.

pub mod backup;
pub mod config;
pub mod database;
pub mod guard;
pub mod migrations;
pub mod queries;
pub mod schema;
pub mod store;

pub use config::StoreConfig;
pub use database::Database;
pub use guard::RetryPolicy;
pub use migrations::{Migration, MigrationPlan};
pub use store::TransactionDb;
