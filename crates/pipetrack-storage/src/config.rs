// SPDX-FileCopyrightText: 2026 Pipetrack Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Store configuration, passed explicitly into the constructor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::guard::RetryPolicy;

/// Configuration for opening a [`crate::TransactionDb`].
///
/// All fields default to sensible values; `#[serde(deny_unknown_fields)]`
/// rejects unrecognized keys when loaded from a config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,

    /// Maximum attempts for operations failing with transient errors.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Delay between retry attempts, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_database_path() -> String {
    "transactions.db".to_string()
}

fn default_wal_mode() -> bool {
    true
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    100
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl StoreConfig {
    /// Retry policy derived from the configured bounds.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}
