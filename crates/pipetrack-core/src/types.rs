// SPDX-FileCopyrightText: 2026 Pipetrack Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain model types shared across the store trait boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Coarse lifecycle state of a transaction. Exactly one value at a time.
///
/// Orthogonal facets (skipped, cancelled, archived, review status) live in
/// their own columns and never alter this state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Processing,
    Completed,
    Failed,
}

/// One persisted job instance moving through the pipeline.
///
/// `id` is assigned by the store on first insert, immutable thereafter, and
/// monotonically increasing in assignment order -- the FIFO proxy used by
/// the peek queue. The three date columns are each set at most once by the
/// store and never overwritten once present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub task_state: TaskState,
    /// Free-form label naming the current pipeline stage.
    pub processing_state: Option<String>,
    /// Advisory progress, 0-100.
    pub task_progress: i64,
    pub skipped: bool,
    pub cancelled: bool,
    pub archived: bool,
    /// Human-review workflow string (`unseen`, `reviewed`, `sent_to_pacs`, ...).
    pub status: Option<String>,
    /// Institution parsed from the job metadata, if any.
    pub institution: Option<String>,
    /// Indexed sequence names parsed from the job metadata, if any.
    pub sequences: Option<String>,
    /// Free-text failure/skip/cancel cause.
    pub error: Option<String>,
    /// Opaque serialized payload owned by the caller. Stored verbatim.
    pub last_message: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub patient_consent: bool,
    pub qa_score: Option<f64>,
    pub billable: Option<String>,
    pub priority: i64,
}

/// Fields a producer supplies when enqueueing a new transaction.
///
/// Everything not listed here starts at its column default: state `queued`,
/// progress 0, all flags unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    /// Initial pipeline stage label. Defaults to `waiting`.
    pub processing_state: String,
    /// Opaque serialized payload. If this parses as a JSON object, the store
    /// injects the assigned id under `t_id` (best effort).
    pub last_message: Option<String>,
    /// Explicit creation timestamp; the store fills in "now" when absent.
    pub creation_date: Option<DateTime<Utc>>,
    pub institution: Option<String>,
    pub sequences: Option<String>,
    pub qa_score: Option<f64>,
    pub billable: Option<String>,
    pub priority: i64,
}

impl Default for NewTransaction {
    fn default() -> Self {
        Self {
            processing_state: "waiting".to_string(),
            last_message: None,
            creation_date: None,
            institution: None,
            sequences: None,
            qa_score: None,
            billable: None,
            priority: 0,
        }
    }
}

/// Per-user preference row. Fixed key set; unknown keys are rejected with
/// `InvalidArgument` at the update boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub user_id: i64,
    pub language: Option<String>,
    pub timezone: Option<String>,
    pub notifications_enabled: bool,
}

/// Metadata associated with a study sent into the pipeline, mainly used by
/// auto-pull systems to deduplicate transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyMetadata {
    pub study_id: String,
    pub origin: Option<String>,
    pub c_move_time: Option<DateTime<Utc>>,
}
