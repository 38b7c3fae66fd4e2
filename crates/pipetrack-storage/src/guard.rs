// SPDX-FileCopyrightText: 2026 Pipetrack Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded retry for transient storage errors.
//!
//! The store composes two layers around every mutating operation: an
//! exclusive per-store lock (held in [`crate::TransactionDb`], scope equals
//! one committed unit of work) and the retry wrapper here. Only errors
//! classified [`StoreError::Transient`] are retried; everything else
//! propagates unchanged with the failed attempt already rolled back.

use std::future::Future;
use std::time::Duration;

use pipetrack_core::StoreError;
use tracing::warn;

/// Bounds for the transparent retry of transient errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(100),
        }
    }
}

/// Run `op`, retrying the whole operation on transient errors up to the
/// policy's bound.
///
/// `recover` runs between attempts to re-establish a dropped
/// connection/session; its failure propagates immediately. Non-transient
/// errors and exhausted budgets surface the original error.
pub async fn with_retry<T, F, Fut, R, RFut>(
    policy: &RetryPolicy,
    op: &'static str,
    recover: R,
    f: F,
) -> Result<T, StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
    R: Fn() -> RFut,
    RFut: Future<Output = Result<(), StoreError>>,
{
    let budget = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < budget => {
                warn!(op, attempt, error = %e, "transient storage error, retrying");
                recover().await?;
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
        }
    }

    async fn no_recover() -> Result<(), StoreError> {
        Ok(())
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), "test_op", no_recover, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::transient("database is locked"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_budget_surfaces_the_transient_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(3), "test_op", no_recover, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::transient("still locked")) }
        })
        .await;
        assert!(matches!(result, Err(StoreError::Transient { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(3), "test_op", no_recover, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::not_found("transaction", 9)) }
        })
        .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recover_runs_between_attempts() {
        let recoveries = AtomicU32::new(0);
        let calls = AtomicU32::new(0);
        let result = with_retry(
            &fast_policy(2),
            "test_op",
            || {
                recoveries.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(StoreError::transient("connection reset"))
                    } else {
                        Ok(())
                    }
                }
            },
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(recoveries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_recovery_propagates() {
        let result: Result<(), _> = with_retry(
            &fast_policy(3),
            "test_op",
            || async { Err(StoreError::storage("cannot reopen")) },
            || async { Err(StoreError::transient("gone")) },
        )
        .await;
        assert!(matches!(result, Err(StoreError::Storage { .. })));
    }

    #[tokio::test]
    async fn zero_attempt_budget_still_runs_once() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(0), "test_op", no_recover, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(1) }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
