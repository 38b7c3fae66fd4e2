// SPDX-FileCopyrightText: 2026 Pipetrack Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The store trait seam implemented by persistence backends.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{NewTransaction, Transaction};

/// Lifecycle operations on the persisted transaction table.
///
/// Every mutating operation executes within a single committed transaction;
/// on any underlying error the transaction rolls back and the targeted row
/// is left exactly as it was before the call. Operations referencing an id
/// that does not resolve fail with [`StoreError::NotFound`].
#[async_trait]
pub trait TransactionStore {
    /// Insert a new queued transaction and return its assigned id.
    ///
    /// `creation_date` is set if absent. When `owner` is given, an
    /// association row is created; an unresolved owner fails with `NotFound`
    /// and rolls back the insert.
    async fn create(&self, new: NewTransaction, owner: Option<i64>) -> Result<i64, StoreError>;

    /// Fetch a transaction by id.
    async fn get(&self, id: i64) -> Result<Transaction, StoreError>;

    /// Read-only peek at the oldest eligible queued transaction.
    ///
    /// Eligible means state `queued` and not archived, optionally further
    /// filtered by stage label. Repeated calls without an intervening
    /// mutation return the same row.
    async fn peek(&self, stage: Option<&str>) -> Result<Option<Transaction>, StoreError>;

    /// Same filter and ordering as [`peek`](Self::peek), full result set.
    async fn peek_all(&self, stage: Option<&str>) -> Result<Vec<Transaction>, StoreError>;

    /// Move a transaction back to `queued`.
    ///
    /// The payload is updated only when given; the stage label defaults to
    /// `waiting` when `None`.
    async fn set_queued(
        &self,
        id: i64,
        last_message: Option<&str>,
        stage: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Mark a transaction as processing the named stage.
    ///
    /// Clears the skipped and cancelled flags, overwrites stage, payload and
    /// progress unconditionally, and sets `start_date` only if unset.
    async fn set_processing(
        &self,
        id: i64,
        stage: &str,
        last_message: &str,
        task_progress: i64,
    ) -> Result<(), StoreError>;

    /// Mark a transaction as failed, recording the cause.
    async fn set_failed(&self, id: i64, cause: &str) -> Result<(), StoreError>;

    /// Mark a transaction as completed.
    ///
    /// `status` defaults to `unseen` only when not already set; the error
    /// field is cleared iff `clear_error`.
    async fn set_completed(&self, id: i64, clear_error: bool) -> Result<(), StoreError>;

    /// Set the skipped flag, optionally recording a cause. Task state is
    /// not altered.
    async fn set_skipped(&self, id: i64, cause: Option<&str>) -> Result<(), StoreError>;

    /// Set the cancelled flag, optionally recording a cause. Task state is
    /// not altered.
    async fn set_cancelled(&self, id: i64, cause: Option<&str>) -> Result<(), StoreError>;

    /// Soft-retire a transaction: it no longer appears in peek results.
    async fn set_archived(&self, id: i64) -> Result<(), StoreError>;

    /// Overwrite the human-review workflow status.
    async fn set_status(&self, id: i64, status: &str) -> Result<(), StoreError>;

    /// Overwrite the opaque payload.
    async fn set_last_message(&self, id: i64, last_message: &str) -> Result<(), StoreError>;

    /// Record or withdraw data-usage patient consent.
    async fn set_patient_consent(&self, id: i64, consent: bool) -> Result<(), StoreError>;

    /// Overwrite the advisory quality score.
    async fn set_qa_score(&self, id: i64, qa_score: f64) -> Result<(), StoreError>;

    /// Overwrite the billing tag.
    async fn set_billable(&self, id: i64, billable: &str) -> Result<(), StoreError>;

    /// Overwrite the scheduling priority.
    async fn set_priority(&self, id: i64, priority: i64) -> Result<(), StoreError>;
}
