//! # Retry Controller
//!
//! Re-runs a unit of work while it fails with a transient error, waiting an
//! exponentially growing, capped delay between attempts.
//!
//! Whether an error is worth retrying is the error's own decision through
//! [`TransientError`]; the controller never inspects messages.
//!
//! ```ignore
//! let controller = RetryController::new(RetryPolicy::default());
//! let outcome = controller
//!     .run("persist_candidate", || async { persist(&candidate).await })
//!     .await?;
//! ```

use crate::error::SyncError;
use core_library::LibraryError;
use core_runtime::config::RetrySettings;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Errors that know whether the failed operation may succeed if repeated.
pub trait TransientError {
    fn is_transient(&self) -> bool;
}

impl TransientError for SyncError {
    fn is_transient(&self) -> bool {
        SyncError::is_transient(self)
    }
}

impl TransientError for LibraryError {
    fn is_transient(&self) -> bool {
        self.is_busy() || self.is_conflict()
    }
}

/// Backoff schedule and attempt limit
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    /// Total attempts, including the first
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    /// Policy for single units of work.
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            initial_delay: settings.initial_delay,
            backoff_factor: settings.backoff_factor,
            max_delay: settings.max_delay,
            max_attempts: settings.max_attempts,
        }
    }

    /// Policy for batch work, which tolerates more attempts.
    pub fn batch() -> Self {
        Self::batch_from_settings(&RetrySettings::default())
    }

    pub fn batch_from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.batch_max_attempts,
            ..Self::from_settings(settings)
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Delay before retry number `retry` (0-based):
    /// `min(initial_delay * backoff_factor^retry, max_delay)`.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }
}

/// Runs operations under a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails with a non-transient error,
    /// or the attempt limit is reached. The last error is returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: TransientError + Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = operation_name, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.delay_for_attempt(attempt - 1);
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient error, retrying"
                    );
                    core_async::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %err,
                            "Retry attempts exhausted"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_initial_delay(Duration::from_millis(1))
            .with_max_attempts(max_attempts)
    }

    #[test]
    fn test_default_and_batch_policies() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(5));
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(RetryPolicy::batch().max_attempts, 5);
    }

    #[test]
    fn test_delay_is_monotonic_until_cap() {
        let policy = RetryPolicy::default();
        let delays: Vec<Duration> = (0..12).map(|n| policy.delay_for_attempt(n)).collect();

        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[2], Duration::from_millis(400));

        let cap_index = delays
            .iter()
            .position(|d| *d == policy.max_delay)
            .unwrap();
        for pair in delays[..=cap_index].windows(2) {
            assert!(pair[0] < pair[1], "{:?} should be < {:?}", pair[0], pair[1]);
        }
        assert!(delays[cap_index..].iter().all(|d| *d == policy.max_delay));
        assert_eq!(policy.delay_for_attempt(u32::MAX), policy.max_delay);
    }

    #[core_async::test]
    async fn test_transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let controller = RetryController::new(fast_policy(3));

        let result: Result<&str, SyncError> = controller
            .run("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SyncError::TransientStorage("database is locked".into()))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[core_async::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let controller = RetryController::new(fast_policy(3));

        let result: Result<(), SyncError> = controller
            .run("always_busy", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::TransientStorage(format!("busy {}", n)))
            })
            .await;

        match result {
            Err(SyncError::TransientStorage(message)) => assert_eq!(message, "busy 2"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[core_async::test]
    async fn test_non_transient_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let controller = RetryController::new(fast_policy(5));

        let result: Result<(), SyncError> = controller
            .run("invalid", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::Validation("empty name".into()))
            })
            .await;

        assert!(matches!(result, Err(SyncError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[core_async::test]
    async fn test_library_busy_is_transient() {
        let calls = AtomicU32::new(0);
        let controller = RetryController::new(fast_policy(2));

        let result: Result<u32, LibraryError> = controller
            .run("write", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(LibraryError::Busy("locked".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert!(!LibraryError::Migration("x".into()).is_transient());
    }
}
