// SPDX-FileCopyrightText: 2026 Pipetrack Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for the transaction store.

use thiserror::Error;

/// Boxed error source carried by the storage-facing variants.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// The primary error type surfaced by every store operation.
///
/// Callers observe the original classification: a rolled-back lifecycle
/// operation re-raises as the variant that caused it, never as a generic
/// wrapper. Only [`StoreError::Transient`] is retried automatically, and
/// only up to the configured retry budget.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An id-based operation referenced a row that does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Attempt to create a duplicate unique entity.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed input (unknown preference key, bad filter combination).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Recoverable storage error (busy database, dropped connection).
    /// Retried automatically before being surfaced.
    #[error("transient storage error: {source}")]
    Transient { source: BoxedSource },

    /// A schema-change or backfill step failed. Fatal to store
    /// initialization; never retried automatically.
    #[error("migration to version {version} failed: {source}")]
    Migration { version: i64, source: BoxedSource },

    /// Non-transient storage backend error.
    #[error("storage error: {source}")]
    Storage { source: BoxedSource },
}

impl StoreError {
    /// Build a [`StoreError::NotFound`] for the given entity and id.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Wrap an arbitrary backend error as non-transient storage failure.
    pub fn storage(source: impl Into<BoxedSource>) -> Self {
        Self::Storage {
            source: source.into(),
        }
    }

    /// Wrap an arbitrary backend error as a retryable transient failure.
    pub fn transient(source: impl Into<BoxedSource>) -> Self {
        Self::Transient {
            source: source.into(),
        }
    }

    /// True for errors the retry wrapper may transparently retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
