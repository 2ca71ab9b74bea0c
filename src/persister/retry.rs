//! Bounded retry for transient execution faults.
//!
//! A batch is retried as a whole: either every statement of the attempt
//! takes effect or the next attempt re-runs them all. Only faults the
//! executor classifies as transient are eligible; constraint violations,
//! bind errors and row-count mismatches surface immediately.

use crate::config::EngineConfig;
use crate::persister::PersistError;
use std::thread;
use std::time::Duration;

/// Attempt count and backoff applied to transient write faults.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            // One attempt minimum, zero would never run the batch.
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for RetryPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self::new(
            config.retry_max_attempts,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }
}

/// Run `batch` under the policy, retrying transient faults.
pub(crate) fn run_with_retry<T>(
    policy: &RetryPolicy,
    mut batch: impl FnMut() -> Result<T, PersistError>,
) -> Result<T, PersistError> {
    let mut attempt = 1;
    loop {
        match batch() {
            Ok(value) => return Ok(value),
            Err(PersistError::Execute(err)) if err.is_transient() => {
                if attempt >= policy.max_attempts {
                    return Err(PersistError::RetriesExhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                log::warn!(
                    "transient fault on attempt {attempt}/{}: {err}, retrying",
                    policy.max_attempts
                );
                thread::sleep(policy.backoff);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecuteError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(0))
    }

    #[test]
    fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = run_with_retry(&policy(3), || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(PersistError::Execute(ExecuteError::Transient(
                    "deadlock".to_string(),
                )))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exhaustion_reports_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retry(&policy(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PersistError::Execute(ExecuteError::Transient(
                "deadlock".to_string(),
            )))
        });
        match result.unwrap_err() {
            PersistError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_constraint_violation_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retry(&policy(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PersistError::Execute(ExecuteError::ConstraintViolation(
                "unique".to_string(),
            )))
        });
        assert!(matches!(
            result.unwrap_err(),
            PersistError::Execute(ExecuteError::ConstraintViolation(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_row_count_mismatch_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retry(&policy(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PersistError::RowCountMismatch {
                expected: 2,
                actual: 1,
            })
        });
        assert!(matches!(
            result.unwrap_err(),
            PersistError::RowCountMismatch { .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
