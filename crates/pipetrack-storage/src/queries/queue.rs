// SPDX-FileCopyrightText: 2026 Pipetrack Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Peek-style queue reads over the transaction table.
//!
//! Ascending `id` approximates creation order because id assignment is
//! monotonic at insert time. These are pure reads: nothing is claimed or
//! removed, so a peeked row is returned again until an intervening
//! `set_processing` or `set_archived`.

use pipetrack_core::{StoreError, Transaction};
use rusqlite::{params, OptionalExtension};

use super::transactions::{row_to_transaction, COLUMNS};
use crate::database::{map_call_err, Database};

fn peek_sql(with_stage: bool, all: bool) -> String {
    let stage_filter = if with_stage {
        " AND processing_state = ?1"
    } else {
        ""
    };
    let limit = if all { "" } else { " LIMIT 1" };
    format!(
        "SELECT {COLUMNS} FROM transactions \
         WHERE task_state = 'queued' AND archived = 0{stage_filter} \
         ORDER BY id ASC{limit}"
    )
}

/// The oldest queued, non-archived transaction, optionally filtered by
/// stage label. `None` when nothing is eligible.
pub async fn peek(db: &Database, stage: Option<&str>) -> Result<Option<Transaction>, StoreError> {
    let stage = stage.map(str::to_string);
    let conn = db.connection().await;
    conn.call(move |conn| {
        let result = match &stage {
            Some(stage) => {
                let mut stmt = conn.prepare(&peek_sql(true, false))?;
                stmt.query_row(params![stage], row_to_transaction).optional()?
            }
            None => {
                let mut stmt = conn.prepare(&peek_sql(false, false))?;
                stmt.query_row([], row_to_transaction).optional()?
            }
        };
        Ok(result)
    })
    .await
    .map_err(map_call_err)
}

/// All queued, non-archived transactions in peek order, for batch or
/// monitoring consumers.
pub async fn peek_all(db: &Database, stage: Option<&str>) -> Result<Vec<Transaction>, StoreError> {
    let stage = stage.map(str::to_string);
    let conn = db.connection().await;
    conn.call(move |conn| {
        let rows = match &stage {
            Some(stage) => {
                let mut stmt = conn.prepare(&peek_sql(true, true))?;
                stmt.query_map(params![stage], row_to_transaction)?
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&peek_sql(false, true))?;
                stmt.query_map([], row_to_transaction)?
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    })
    .await
    .map_err(map_call_err)
}
