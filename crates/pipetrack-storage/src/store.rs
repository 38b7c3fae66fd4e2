// SPDX-FileCopyrightText: 2026 Pipetrack Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The SQLite-backed transaction store facade.
//!
//! [`TransactionDb`] wires the raw [`Database`] handle together with the
//! retry guard and a process-wide write lock. Lifecycle operations take the
//! lock so overlapping read-modify-write cycles from different tasks
//! serialize; auxiliary user/study bookkeeping only gets the retry wrapper,
//! matching how little it contends.

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipetrack_core::{
    NewTransaction, StoreError, StudyMetadata, Transaction, TransactionStore, UserPreferences,
};
use tokio::sync::Mutex;

use crate::config::StoreConfig;
use crate::database::Database;
use crate::guard::{with_retry, RetryPolicy};
use crate::migrations::MigrationPlan;
use crate::queries::{queue, studies, transactions, users};

/// Handle to one transaction store file (or an in-memory store).
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct TransactionDb {
    db: Database,
    write_lock: Mutex<()>,
    retry: RetryPolicy,
}

impl TransactionDb {
    /// Open (and migrate, if outdated) the store at `path` with default
    /// settings.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let config = StoreConfig {
            database_path: path.to_string(),
            ..StoreConfig::default()
        };
        Self::open_with(&config).await
    }

    /// Open with explicit settings. An outdated on-disk schema is backed up
    /// and migrated before the handle is returned.
    pub async fn open_with(config: &StoreConfig) -> Result<Self, StoreError> {
        let db = Database::open_with(config, MigrationPlan::builtin()).await?;
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
            retry: config.retry_policy(),
        })
    }

    /// Checkpoint and release the underlying connection.
    pub async fn close(&self) -> Result<(), StoreError> {
        self.db.close().await
    }

    /// Run `f` under the write lock with transient-error retries.
    async fn locked<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let _serial = self.write_lock.lock().await;
        with_retry(&self.retry, op, || self.db.ensure_open(), f).await
    }

    /// Run `f` with transient-error retries only.
    async fn unlocked<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        with_retry(&self.retry, op, || self.db.ensure_open(), f).await
    }
}

#[async_trait]
impl TransactionStore for TransactionDb {
    async fn create(&self, new: NewTransaction, owner: Option<i64>) -> Result<i64, StoreError> {
        self.locked("create", || transactions::create(&self.db, new.clone(), owner))
            .await
    }

    async fn get(&self, id: i64) -> Result<Transaction, StoreError> {
        self.locked("get", || transactions::get(&self.db, id)).await
    }

    async fn peek(&self, stage: Option<&str>) -> Result<Option<Transaction>, StoreError> {
        self.locked("peek", || queue::peek(&self.db, stage)).await
    }

    async fn peek_all(&self, stage: Option<&str>) -> Result<Vec<Transaction>, StoreError> {
        self.locked("peek_all", || queue::peek_all(&self.db, stage))
            .await
    }

    async fn set_queued(
        &self,
        id: i64,
        last_message: Option<&str>,
        stage: Option<&str>,
    ) -> Result<(), StoreError> {
        self.locked("set_queued", || {
            transactions::set_queued(&self.db, id, last_message, stage)
        })
        .await
    }

    async fn set_processing(
        &self,
        id: i64,
        stage: &str,
        last_message: &str,
        task_progress: i64,
    ) -> Result<(), StoreError> {
        self.locked("set_processing", || {
            transactions::set_processing(&self.db, id, stage, last_message, task_progress)
        })
        .await
    }

    async fn set_failed(&self, id: i64, cause: &str) -> Result<(), StoreError> {
        self.locked("set_failed", || transactions::set_failed(&self.db, id, cause))
            .await
    }

    async fn set_completed(&self, id: i64, clear_error: bool) -> Result<(), StoreError> {
        self.locked("set_completed", || {
            transactions::set_completed(&self.db, id, clear_error)
        })
        .await
    }

    async fn set_skipped(&self, id: i64, cause: Option<&str>) -> Result<(), StoreError> {
        self.locked("set_skipped", || transactions::set_skipped(&self.db, id, cause))
            .await
    }

    async fn set_cancelled(&self, id: i64, cause: Option<&str>) -> Result<(), StoreError> {
        self.locked("set_cancelled", || {
            transactions::set_cancelled(&self.db, id, cause)
        })
        .await
    }

    async fn set_archived(&self, id: i64) -> Result<(), StoreError> {
        self.locked("set_archived", || transactions::set_archived(&self.db, id))
            .await
    }

    async fn set_status(&self, id: i64, status: &str) -> Result<(), StoreError> {
        self.locked("set_status", || transactions::set_status(&self.db, id, status))
            .await
    }

    async fn set_last_message(&self, id: i64, last_message: &str) -> Result<(), StoreError> {
        self.locked("set_last_message", || {
            transactions::set_last_message(&self.db, id, last_message)
        })
        .await
    }

    async fn set_patient_consent(&self, id: i64, consent: bool) -> Result<(), StoreError> {
        self.locked("set_patient_consent", || {
            transactions::set_patient_consent(&self.db, id, consent)
        })
        .await
    }

    async fn set_qa_score(&self, id: i64, qa_score: f64) -> Result<(), StoreError> {
        self.locked("set_qa_score", || {
            transactions::set_qa_score(&self.db, id, qa_score)
        })
        .await
    }

    async fn set_billable(&self, id: i64, billable: &str) -> Result<(), StoreError> {
        self.locked("set_billable", || {
            transactions::set_billable(&self.db, id, billable)
        })
        .await
    }

    async fn set_priority(&self, id: i64, priority: i64) -> Result<(), StoreError> {
        self.locked("set_priority", || {
            transactions::set_priority(&self.db, id, priority)
        })
        .await
    }
}

impl TransactionDb {
    /// Register a user; `Conflict` on a duplicate name.
    pub async fn add_user(&self, name: &str, password_hash: &str) -> Result<i64, StoreError> {
        self.unlocked("add_user", || users::add_user(&self.db, name, password_hash))
            .await
    }

    /// Delete a user and their role/preference/site rows.
    pub async fn remove_user(&self, user_id: i64) -> Result<(), StoreError> {
        self.unlocked("remove_user", || users::remove_user(&self.db, user_id))
            .await
    }

    /// Define a role.
    pub async fn add_role(
        &self,
        role_id: &str,
        description: &str,
        permissions: i64,
    ) -> Result<(), StoreError> {
        self.unlocked("add_role", || {
            users::add_role(&self.db, role_id, description, permissions)
        })
        .await
    }

    /// Assign a role to a user.
    pub async fn add_user_role(&self, user_id: i64, role_id: &str) -> Result<(), StoreError> {
        self.unlocked("add_user_role", || {
            users::add_user_role(&self.db, user_id, role_id)
        })
        .await
    }

    /// Take a role away from a user.
    pub async fn revoke_user_role(&self, user_id: i64, role_id: &str) -> Result<(), StoreError> {
        self.unlocked("revoke_user_role", || {
            users::revoke_user_role(&self.db, user_id, role_id)
        })
        .await
    }

    /// Patch a user's preferences from a JSON object.
    pub async fn set_user_preferences(
        &self,
        user_id: i64,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        self.unlocked("set_user_preferences", || {
            users::set_user_preferences(&self.db, user_id, patch.clone())
        })
        .await
    }

    /// The stored preferences, `None` when the user never set any.
    pub async fn get_user_preferences(
        &self,
        user_id: i64,
    ) -> Result<Option<UserPreferences>, StoreError> {
        self.unlocked("get_user_preferences", || {
            users::get_user_preferences(&self.db, user_id)
        })
        .await
    }

    /// Site ids the user may see.
    pub async fn get_user_sites(&self, user_id: i64) -> Result<Vec<i64>, StoreError> {
        self.unlocked("get_user_sites", || users::get_user_sites(&self.db, user_id))
            .await
    }

    /// Replace the user's site set wholesale.
    pub async fn set_user_sites(&self, user_id: i64, sites: Vec<i64>) -> Result<(), StoreError> {
        self.unlocked("set_user_sites", || {
            users::set_user_sites(&self.db, user_id, sites.clone())
        })
        .await
    }

    /// Record transfer metadata for a study.
    pub async fn add_study_metadata(
        &self,
        study_id: &str,
        origin: &str,
        c_move_time: DateTime<Utc>,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        self.unlocked("add_study_metadata", || {
            studies::add_study_metadata(&self.db, study_id, origin, c_move_time, overwrite)
        })
        .await
    }

    /// The stored metadata for a study, `None` if never recorded.
    pub async fn get_study_metadata(
        &self,
        study_id: &str,
    ) -> Result<Option<StudyMetadata>, StoreError> {
        self.unlocked("get_study_metadata", || {
            studies::get_study_metadata(&self.db, study_id)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn setup_store() -> (TransactionDb, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("store.db");
        let store = TransactionDb::open(db_path.to_str().unwrap()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn lifecycle_round_trips_through_the_trait() {
        let (store, _dir) = setup_store().await;
        let store: &dyn TransactionStore = &store;

        let id = store.create(NewTransaction::default(), None).await.unwrap();
        let head = store.peek(None).await.unwrap().unwrap();
        assert_eq!(head.id, id);

        store
            .set_processing(id, "classifier", "{\"t_id\": 1}", 10)
            .await
            .unwrap();
        store.set_completed(id, true).await.unwrap();

        let done = store.get(id).await.unwrap();
        assert_eq!(done.task_state, pipetrack_core::TaskState::Completed);
        assert_eq!(done.status.as_deref(), Some("unseen"));
        assert!(store.peek(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_creates_assign_distinct_ids() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("store.db");
        let store = Arc::new(
            TransactionDb::open(db_path.to_str().unwrap()).await.unwrap(),
        );

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.create(NewTransaction::default(), None).await.unwrap()
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 10);

        let queued = store.peek_all(None).await.unwrap();
        assert_eq!(queued.len(), 10);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn mutations_wait_for_the_store_lock() {
        let (store, _dir) = setup_store().await;
        let id = store.create(NewTransaction::default(), None).await.unwrap();
        let store = Arc::new(store);

        let guard = store.write_lock.lock().await;
        let blocked = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.set_failed(id, "late failure").await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        drop(guard);
        blocked.await.unwrap().unwrap();
        let row = store.get(id).await.unwrap();
        assert_eq!(row.task_state, pipetrack_core::TaskState::Failed);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn aux_crud_is_reachable_through_the_facade() {
        let (store, _dir) = setup_store().await;

        let user = store.add_user("alice", "hash").await.unwrap();
        store.add_role("viewer", "read only", 1).await.unwrap();
        store.add_user_role(user, "viewer").await.unwrap();
        store.set_user_sites(user, vec![4]).await.unwrap();
        assert_eq!(store.get_user_sites(user).await.unwrap(), vec![4]);

        let when = Utc::now();
        store
            .add_study_metadata("1.2.3", "PACS-A", when, false)
            .await
            .unwrap();
        let meta = store.get_study_metadata("1.2.3").await.unwrap().unwrap();
        assert_eq!(meta.origin.as_deref(), Some("PACS-A"));
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn owned_create_associates_and_checks_the_owner() {
        let (store, _dir) = setup_store().await;

        let err = store
            .create(NewTransaction::default(), Some(999))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        let user = store.add_user("alice", "hash").await.unwrap();
        let id = store
            .create(NewTransaction::default(), Some(user))
            .await
            .unwrap();
        assert!(id > 0);
        store.close().await.unwrap();
    }
}
