// SPDX-FileCopyrightText: 2026 Pipetrack Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules over the storage tables.
//!
//! Functions here run the raw statements; locking and transient-error retry
//! are composed on top by [`crate::TransactionDb`].

pub mod queue;
pub mod studies;
pub mod transactions;
pub mod users;
