// SPDX-FileCopyrightText: 2026 Pipetrack Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Study transfer metadata, keyed by DICOM study id.
//!
//! Auto-pull consumers record when a study was last fetched so repeat
//! C-MOVE requests can be deduplicated.

use chrono::{DateTime, Utc};
use pipetrack_core::{StoreError, StudyMetadata};
use rusqlite::{params, OptionalExtension};

use crate::database::{map_call_err, Database};

/// Record transfer metadata for a study. With `overwrite` the row is
/// upserted; without it a second write for the same study id conflicts.
pub async fn add_study_metadata(
    db: &Database,
    study_id: &str,
    origin: &str,
    c_move_time: DateTime<Utc>,
    overwrite: bool,
) -> Result<(), StoreError> {
    let study_id = study_id.to_string();
    let origin = origin.to_string();
    let conn = db.connection().await;
    conn.call(move |conn| {
        if overwrite {
            conn.execute(
                "INSERT INTO studies_metadata (study_id, origin, c_move_time) \
                 VALUES (?1, ?2, ?3) \
                 ON CONFLICT (study_id) DO UPDATE SET origin = ?2, c_move_time = ?3",
                params![study_id, origin, c_move_time],
            )?;
            return Ok(());
        }
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO studies_metadata (study_id, origin, c_move_time) \
             VALUES (?1, ?2, ?3)",
            params![study_id, origin, c_move_time],
        )?;
        if inserted == 0 {
            return Err(StoreError::Conflict(format!("study '{study_id}' already has metadata"))
                .into());
        }
        Ok(())
    })
    .await
    .map_err(map_call_err)
}

/// The stored metadata for a study, `None` if it was never recorded.
pub async fn get_study_metadata(
    db: &Database,
    study_id: &str,
) -> Result<Option<StudyMetadata>, StoreError> {
    let study_id = study_id.to_string();
    let conn = db.connection().await;
    conn.call(move |conn| {
        let row = conn
            .query_row(
                "SELECT study_id, origin, c_move_time FROM studies_metadata \
                 WHERE study_id = ?1",
                [study_id],
                |row| {
                    Ok(StudyMetadata {
                        study_id: row.get(0)?,
                        origin: row.get(1)?,
                        c_move_time: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    })
    .await
    .map_err(map_call_err)
}
