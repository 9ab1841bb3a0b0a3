//! Retry with exponential backoff
//!
//! The delay for attempt `i` (0-indexed) is `base_delay * 2^i + (i * 137 + 37)ms`.
//! The jitter term is deterministic so retry timing is reproducible in tests.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Reusable retry policy for remote calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry, doubled on every further retry
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff delay after the failed attempt `attempt` (0-indexed)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let jitter = Duration::from_millis(u64::from(attempt) * 137 + 37);
        self.base_delay.saturating_mul(factor) + jitter
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent. The last error is returned.
    pub async fn run<T, E, F, Fut, P>(&self, label: &str, is_retryable: P, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation = label, attempts = attempt + 1, "Request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !is_retryable(&err) => {
                    debug!(operation = label, "Request failed with non-retryable error: {}", err);
                    return Err(err);
                }
                Err(err) => {
                    if attempt + 1 >= max_attempts {
                        error!(
                            operation = label,
                            attempts = max_attempts,
                            "GitHub API request failed after retries: {}",
                            err
                        );
                        return Err(err);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = label,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "GitHub API request failed, retrying: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1037));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2174));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4311));
    }

    #[test]
    fn test_zero_attempts_is_clamped() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        assert_eq!(policy.max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_then_success_waits_two_delays() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let counter = calls.clone();
        let result = policy
            .run("commit", SyncError::is_retryable, || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(SyncError::from_status(500, "boom"))
                    } else {
                        Ok("abc123")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "abc123");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let expected = policy.delay_for(0) + policy.delay_for(1);
        let elapsed = start.elapsed();
        assert!(elapsed >= expected, "waited {:?}, expected {:?}", elapsed, expected);
        assert!(elapsed < expected + Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_error_is_not_retried() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let counter = calls.clone();
        let result: Result<(), SyncError> = policy
            .run("release", SyncError::is_retryable, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SyncError::from_status(401, "Bad credentials"))
                }
            })
            .await;

        assert!(matches!(result, Err(SyncError::RemoteRejected { status: 401, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), SyncError> = policy
            .run("tag", SyncError::is_retryable, || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Err(SyncError::from_status(502, format!("attempt {}", n)))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(SyncError::RemoteTransient { message, .. }) => assert_eq!(message, "attempt 2"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
