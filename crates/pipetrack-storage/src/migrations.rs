// SPDX-FileCopyrightText: 2026 Pipetrack Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Versioned schema migrations for the transaction store.
//!
//! Flyway-style: the applied version is persisted in the `schema_version`
//! singleton and ordered steps are applied strictly ascending until the
//! store meets the target. Each version's DDL batch commits in one
//! transaction and the version counter advances in a separate transaction
//! immediately after. Data backfills run in a second pass after all DDL for
//! the range has committed; they never move the version counter, which
//! reflects schema shape, not data completeness.
//!
//! The step registry is explicit configuration handed to the engine, not a
//! global. Steps must stay safe to re-run from the recorded version: a
//! crash between a batch commit and its counter advance re-applies that
//! batch on the next open.

use pipetrack_core::StoreError;
use rusqlite::params;
use tracing::{info, warn};

use crate::schema::{SCHEMA_NAME, SCHEMA_VERSION};

/// A procedural data transform run after the schema change for its version
/// has committed. Receives a connection scoped to one transaction.
pub type Backfill = fn(&rusqlite::Connection) -> rusqlite::Result<()>;

/// One versioned migration step: the DDL batch that produces this version's
/// schema shape, plus an optional data backfill.
pub struct Migration {
    pub version: i64,
    pub ddl: &'static [&'static str],
    pub backfill: Option<Backfill>,
}

/// Ordered, gap-free list of migration steps.
pub struct MigrationPlan {
    steps: Vec<Migration>,
}

impl MigrationPlan {
    /// Build a plan from explicit steps, validating that versions ascend
    /// contiguously.
    pub fn new(steps: Vec<Migration>) -> Result<Self, StoreError> {
        for pair in steps.windows(2) {
            if pair[1].version != pair[0].version + 1 {
                return Err(StoreError::InvalidArgument(format!(
                    "migration versions must be contiguous, found {} after {}",
                    pair[1].version, pair[0].version
                )));
            }
        }
        Ok(Self { steps })
    }

    /// The shipped migration history, targeting [`SCHEMA_VERSION`].
    pub fn builtin() -> Self {
        let steps = vec![
            Migration {
                version: 2,
                ddl: &["ALTER TABLE transactions ADD COLUMN task_progress INTEGER NOT NULL DEFAULT 0"],
                backfill: Some(backfill_stage_progress),
            },
            Migration {
                version: 3,
                ddl: &["ALTER TABLE transactions ADD COLUMN task_skipped INTEGER NOT NULL DEFAULT 0"],
                backfill: None,
            },
            Migration {
                version: 4,
                ddl: &["ALTER TABLE transactions ADD COLUMN task_cancelled INTEGER NOT NULL DEFAULT 0"],
                backfill: None,
            },
            Migration {
                version: 5,
                ddl: &[
                    "ALTER TABLE transactions ADD COLUMN status TEXT",
                    "ALTER TABLE transactions ADD COLUMN institution TEXT",
                    "ALTER TABLE transactions ADD COLUMN sequences TEXT",
                ],
                backfill: Some(backfill_review_status),
            },
            Migration {
                version: 6,
                ddl: &["ALTER TABLE transactions ADD COLUMN patient_consent INTEGER NOT NULL DEFAULT 0"],
                backfill: None,
            },
            Migration {
                version: 7,
                ddl: &[
                    "ALTER TABLE transactions ADD COLUMN qa_score REAL",
                    "ALTER TABLE transactions ADD COLUMN billable TEXT",
                    "ALTER TABLE transactions ADD COLUMN priority INTEGER NOT NULL DEFAULT 0",
                ],
                backfill: None,
            },
        ];
        debug_assert_eq!(steps.last().map(|s| s.version), Some(SCHEMA_VERSION));
        Self { steps }
    }

    /// Highest version this plan produces, or 1 for an empty plan.
    pub fn target_version(&self) -> i64 {
        self.steps.last().map_or(1, |step| step.version)
    }

    fn steps_after(&self, version: i64) -> impl Iterator<Item = &Migration> {
        self.steps.iter().filter(move |step| step.version > version)
    }
}

/// Advance a store from `from_version` to the plan's target.
///
/// On any statement failure the failing version's batch rolls back
/// entirely, the counter stays at the last successfully advanced version,
/// and the failure propagates as [`StoreError::Migration`] -- later
/// versions are never attempted. A failing backfill rolls back that script
/// only.
pub fn run(
    conn: &mut rusqlite::Connection,
    plan: &MigrationPlan,
    from_version: i64,
) -> Result<(), StoreError> {
    // A plan that cannot continue where the store left off would skip
    // versions; refuse it before touching the schema.
    if let Some(first) = plan.steps_after(from_version).next() {
        if first.version != from_version + 1 {
            return Err(StoreError::InvalidArgument(format!(
                "migration plan resumes at version {}, store is at {}",
                first.version, from_version
            )));
        }
    }

    for step in plan.steps_after(from_version) {
        info!(version = step.version, "applying schema migration");
        let tx = conn.transaction().map_err(migration_err(step.version))?;
        for statement in step.ddl {
            tx.execute_batch(statement)
                .map_err(migration_err(step.version))?;
        }
        tx.commit().map_err(migration_err(step.version))?;

        // The counter advances in its own transaction, only after the
        // batch above has committed.
        let tx = conn.transaction().map_err(migration_err(step.version))?;
        tx.execute(
            "UPDATE schema_version SET version = ?1 WHERE name = ?2",
            params![step.version, SCHEMA_NAME],
        )
        .map_err(migration_err(step.version))?;
        tx.commit().map_err(migration_err(step.version))?;
    }

    for step in plan.steps_after(from_version) {
        let Some(backfill) = step.backfill else {
            continue;
        };
        warn!(
            version = step.version,
            "running data backfill, do not stop the pipeline"
        );
        let tx = conn.transaction().map_err(migration_err(step.version))?;
        backfill(&tx).map_err(migration_err(step.version))?;
        tx.commit().map_err(migration_err(step.version))?;
        info!(version = step.version, "data backfill finished");
    }

    Ok(())
}

/// Read the persisted schema version, if the singleton row exists.
pub fn read_version(conn: &rusqlite::Connection) -> rusqlite::Result<Option<i64>> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        "SELECT version FROM schema_version WHERE name = ?1",
        params![SCHEMA_NAME],
        |row| row.get(0),
    )
    .optional()
}

/// Insert the singleton version row for a freshly created store.
pub fn write_initial_version(conn: &rusqlite::Connection, version: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO schema_version (name, version) VALUES (?1, ?2)",
        params![SCHEMA_NAME, version],
    )?;
    Ok(())
}

fn migration_err(version: i64) -> impl Fn(rusqlite::Error) -> StoreError {
    move |e| StoreError::Migration {
        version,
        source: Box::new(e),
    }
}

/// v2 backfill: translate legacy stage labels into the new progress column.
fn backfill_stage_progress(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    const STAGE_PROGRESS: &[(&str, i64)] = &[
        ("spm_lesion", 10),
        ("spm_volumetry", 10),
        ("volumetry_assessment", 80),
        ("report", 90),
        ("send_to_pacs", 100),
    ];
    for (stage, progress) in STAGE_PROGRESS {
        conn.execute(
            "UPDATE transactions SET task_progress = ?1 WHERE processing_state = ?2",
            params![progress, stage],
        )?;
    }
    Ok(())
}

/// v5 backfill: seed the review status from the stage a row was last seen
/// in. Anything not already sent to PACS starts unseen.
fn backfill_review_status(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE transactions SET status = 'sent_to_pacs' WHERE processing_state = 'send_to_pacs'",
        [],
    )?;
    conn.execute(
        "UPDATE transactions SET status = 'unseen' \
         WHERE processing_state != 'send_to_pacs' OR processing_state IS NULL",
        [],
    )?;
    Ok(())
}
