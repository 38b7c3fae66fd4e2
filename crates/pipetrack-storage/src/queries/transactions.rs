// SPDX-FileCopyrightText: 2026 Pipetrack Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle operations on the `transactions` table.
//!
//! Each mutating function runs inside a single committed SQLite
//! transaction; an error before the commit rolls the whole unit back.
//! Set-at-most-once timestamps are enforced in SQL via
//! `COALESCE(column, ?now)` so a present value is never overwritten.

use chrono::Utc;
use pipetrack_core::{NewTransaction, StoreError, TaskState, Transaction};
use rusqlite::{params, OptionalExtension};

use crate::database::{map_call_err, CallError, Database};

/// Column list matching [`row_to_transaction`]'s index order.
pub(crate) const COLUMNS: &str = "id, task_state, processing_state, task_progress, \
     task_skipped, task_cancelled, archived, status, institution, sequences, \
     error, last_message, creation_date, start_date, end_date, \
     patient_consent, qa_score, billable, priority";

pub(crate) fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transaction> {
    let state: String = row.get(1)?;
    let task_state = state.parse::<TaskState>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Transaction {
        id: row.get(0)?,
        task_state,
        processing_state: row.get(2)?,
        task_progress: row.get(3)?,
        skipped: row.get(4)?,
        cancelled: row.get(5)?,
        archived: row.get(6)?,
        status: row.get(7)?,
        institution: row.get(8)?,
        sequences: row.get(9)?,
        error: row.get(10)?,
        last_message: row.get(11)?,
        creation_date: row.get(12)?,
        start_date: row.get(13)?,
        end_date: row.get(14)?,
        patient_consent: row.get(15)?,
        qa_score: row.get(16)?,
        billable: row.get(17)?,
        priority: row.get(18)?,
    })
}

/// Fail with `NotFound` unless the transaction row exists.
fn require_row(conn: &rusqlite::Connection, id: i64) -> Result<(), CallError> {
    let exists: Option<i64> = conn
        .query_row("SELECT id FROM transactions WHERE id = ?1", [id], |row| {
            row.get(0)
        })
        .optional()?;
    if exists.is_none() {
        return Err(StoreError::not_found("transaction", id).into());
    }
    Ok(())
}

/// Best-effort enrichment: inject the assigned id into a JSON-object
/// payload under `t_id` for downstream correlation. Anything that does not
/// parse as an object is left alone.
fn inject_transaction_id(payload: &str, id: i64) -> Option<String> {
    let mut value: serde_json::Value = serde_json::from_str(payload).ok()?;
    let object = value.as_object_mut()?;
    object.insert("t_id".to_string(), serde_json::json!(id));
    serde_json::to_string(&value).ok()
}

/// Insert a new queued transaction, returning the assigned id.
///
/// When `owner` is given the association row is created in the same unit;
/// an unresolved owner rolls the insert back and fails with `NotFound`.
pub async fn create(
    db: &Database,
    new: NewTransaction,
    owner: Option<i64>,
) -> Result<i64, StoreError> {
    let conn = db.connection().await;
    conn.call(move |conn| {
        let tx = conn.transaction()?;
        let creation_date = new.creation_date.unwrap_or_else(Utc::now);
        tx.execute(
            "INSERT INTO transactions (task_state, processing_state, last_message, \
             creation_date, institution, sequences, qa_score, billable, priority) \
             VALUES ('queued', ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.processing_state,
                new.last_message,
                creation_date,
                new.institution,
                new.sequences,
                new.qa_score,
                new.billable,
                new.priority,
            ],
        )?;
        let id = tx.last_insert_rowid();

        if let Some(owner) = owner {
            let known: Option<i64> = tx
                .query_row("SELECT id FROM users WHERE id = ?1", [owner], |row| {
                    row.get(0)
                })
                .optional()?;
            if known.is_none() {
                return Err(StoreError::not_found("user", owner).into());
            }
            tx.execute(
                "INSERT INTO user_transactions (user_id, transaction_id) VALUES (?1, ?2)",
                params![owner, id],
            )?;
        }

        let enriched = new
            .last_message
            .as_deref()
            .and_then(|payload| inject_transaction_id(payload, id));
        if let Some(enriched) = enriched {
            tx.execute(
                "UPDATE transactions SET last_message = ?1 WHERE id = ?2",
                params![enriched, id],
            )?;
        }

        tx.commit()?;
        Ok(id)
    })
    .await
    .map_err(map_call_err)
}

/// Fetch a transaction by id.
pub async fn get(db: &Database, id: i64) -> Result<Transaction, StoreError> {
    let conn = db.connection().await;
    conn.call(move |conn| {
        let mut stmt =
            conn.prepare(&format!("SELECT {COLUMNS} FROM transactions WHERE id = ?1"))?;
        let row = stmt.query_row([id], row_to_transaction).optional()?;
        row.ok_or_else(|| StoreError::not_found("transaction", id).into())
    })
    .await
    .map_err(map_call_err)
}

/// Move a transaction back to `queued`, optionally replacing the payload.
/// The stage label defaults to `waiting`, signalling consumers it will be
/// polled again in the future.
pub async fn set_queued(
    db: &Database,
    id: i64,
    last_message: Option<&str>,
    stage: Option<&str>,
) -> Result<(), StoreError> {
    let stage = stage.unwrap_or("waiting").to_string();
    let last_message = last_message.map(str::to_string);
    let conn = db.connection().await;
    conn.call(move |conn| {
        let tx = conn.transaction()?;
        require_row(&tx, id)?;
        tx.execute(
            "UPDATE transactions SET task_state = 'queued', processing_state = ?1 WHERE id = ?2",
            params![stage, id],
        )?;
        if let Some(payload) = last_message {
            tx.execute(
                "UPDATE transactions SET last_message = ?1 WHERE id = ?2",
                params![payload, id],
            )?;
        }
        tx.commit()?;
        Ok(())
    })
    .await
    .map_err(map_call_err)
}

/// Mark the transaction as processing `stage`.
///
/// Clears the skipped and cancelled flags, overwrites stage, payload and
/// progress unconditionally, and sets `start_date` only the first time a
/// row moves into processing.
pub async fn set_processing(
    db: &Database,
    id: i64,
    stage: &str,
    last_message: &str,
    task_progress: i64,
) -> Result<(), StoreError> {
    let stage = stage.to_string();
    let last_message = last_message.to_string();
    let conn = db.connection().await;
    conn.call(move |conn| {
        let tx = conn.transaction()?;
        require_row(&tx, id)?;
        tx.execute(
            "UPDATE transactions SET task_state = 'processing', processing_state = ?1, \
             last_message = ?2, task_progress = ?3, task_skipped = 0, task_cancelled = 0, \
             start_date = COALESCE(start_date, ?4) WHERE id = ?5",
            params![stage, last_message, task_progress, Utc::now(), id],
        )?;
        tx.commit()?;
        Ok(())
    })
    .await
    .map_err(map_call_err)
}

/// Mark the transaction as failed, recording the cause.
pub async fn set_failed(db: &Database, id: i64, cause: &str) -> Result<(), StoreError> {
    let cause = cause.to_string();
    let conn = db.connection().await;
    conn.call(move |conn| {
        let tx = conn.transaction()?;
        require_row(&tx, id)?;
        let now = Utc::now();
        tx.execute(
            "UPDATE transactions SET task_state = 'failed', error = ?1, \
             start_date = COALESCE(start_date, ?2), end_date = COALESCE(end_date, ?2) \
             WHERE id = ?3",
            params![cause, now, id],
        )?;
        tx.commit()?;
        Ok(())
    })
    .await
    .map_err(map_call_err)
}

/// Mark the transaction as completed.
///
/// `status` falls back to `unseen` only when not already set (a reviewed
/// row stays reviewed); the error field is cleared iff `clear_error`.
pub async fn set_completed(db: &Database, id: i64, clear_error: bool) -> Result<(), StoreError> {
    const COMPLETE: &str = "UPDATE transactions SET task_state = 'completed', \
         status = CASE WHEN status IS NULL OR status = '' THEN 'unseen' ELSE status END, \
         start_date = COALESCE(start_date, ?1), end_date = COALESCE(end_date, ?1), \
         error = '' WHERE id = ?2";
    const COMPLETE_KEEP_ERROR: &str = "UPDATE transactions SET task_state = 'completed', \
         status = CASE WHEN status IS NULL OR status = '' THEN 'unseen' ELSE status END, \
         start_date = COALESCE(start_date, ?1), end_date = COALESCE(end_date, ?1) \
         WHERE id = ?2";
    let conn = db.connection().await;
    conn.call(move |conn| {
        let tx = conn.transaction()?;
        require_row(&tx, id)?;
        let sql = if clear_error {
            COMPLETE
        } else {
            COMPLETE_KEEP_ERROR
        };
        tx.execute(sql, params![Utc::now(), id])?;
        tx.commit()?;
        Ok(())
    })
    .await
    .map_err(map_call_err)
}

async fn set_flag(
    db: &Database,
    id: i64,
    column: &'static str,
    cause: Option<&str>,
) -> Result<(), StoreError> {
    let cause = cause.map(str::to_string);
    let conn = db.connection().await;
    conn.call(move |conn| {
        let tx = conn.transaction()?;
        require_row(&tx, id)?;
        tx.execute(
            &format!("UPDATE transactions SET {column} = 1 WHERE id = ?1"),
            [id],
        )?;
        if let Some(cause) = cause {
            tx.execute(
                "UPDATE transactions SET error = ?1 WHERE id = ?2",
                params![cause, id],
            )?;
        }
        tx.commit()?;
        Ok(())
    })
    .await
    .map_err(map_call_err)
}

/// Set the skipped flag without touching the task state.
pub async fn set_skipped(db: &Database, id: i64, cause: Option<&str>) -> Result<(), StoreError> {
    set_flag(db, id, "task_skipped", cause).await
}

/// Set the cancelled flag without touching the task state.
pub async fn set_cancelled(db: &Database, id: i64, cause: Option<&str>) -> Result<(), StoreError> {
    set_flag(db, id, "task_cancelled", cause).await
}

/// Soft-retire the transaction: it no longer shows up in peeks.
pub async fn set_archived(db: &Database, id: i64) -> Result<(), StoreError> {
    set_flag(db, id, "archived", None).await
}

/// Overwrite a single column of an existing row within one committed unit.
async fn set_scalar<V>(
    db: &Database,
    id: i64,
    column: &'static str,
    value: V,
) -> Result<(), StoreError>
where
    V: rusqlite::ToSql + Send + 'static,
{
    let conn = db.connection().await;
    conn.call(move |conn| {
        let tx = conn.transaction()?;
        require_row(&tx, id)?;
        tx.execute(
            &format!("UPDATE transactions SET {column} = ?1 WHERE id = ?2"),
            params![value, id],
        )?;
        tx.commit()?;
        Ok(())
    })
    .await
    .map_err(map_call_err)
}

/// Overwrite the human-review workflow status, e.g. `reviewed` when a
/// radiologist visits the results, or `sent_to_pacs`.
pub async fn set_status(db: &Database, id: i64, status: &str) -> Result<(), StoreError> {
    set_scalar(db, id, "status", status.to_string()).await
}

/// Overwrite the opaque payload.
pub async fn set_last_message(db: &Database, id: i64, last_message: &str) -> Result<(), StoreError> {
    set_scalar(db, id, "last_message", last_message.to_string()).await
}

/// Record or withdraw data-usage patient consent.
pub async fn set_patient_consent(db: &Database, id: i64, consent: bool) -> Result<(), StoreError> {
    set_scalar(db, id, "patient_consent", consent).await
}

/// Overwrite the advisory quality score.
pub async fn set_qa_score(db: &Database, id: i64, qa_score: f64) -> Result<(), StoreError> {
    set_scalar(db, id, "qa_score", qa_score).await
}

/// Overwrite the billing tag.
pub async fn set_billable(db: &Database, id: i64, billable: &str) -> Result<(), StoreError> {
    set_scalar(db, id, "billable", billable.to_string()).await
}

/// Overwrite the scheduling priority.
pub async fn set_priority(db: &Database, id: i64, priority: i64) -> Result<(), StoreError> {
    set_scalar(db, id, "priority", priority).await
}
