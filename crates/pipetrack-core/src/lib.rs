// SPDX-FileCopyrightText: 2026 Pipetrack Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the pipetrack transaction database.
//!
//! This crate provides the domain model, error taxonomy, and the store
//! trait implemented by persistence backends. The SQLite backend lives in
//! `pipetrack-storage`.

pub mod error;
pub mod traits;
pub mod types;

pub use error::StoreError;
pub use traits::TransactionStore;
pub use types::{NewTransaction, StudyMetadata, TaskState, Transaction, UserPreferences};
