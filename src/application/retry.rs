use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::domain::{CoreError, Limits};

/// Exponential backoff with jitter, applied around calls to external
/// providers.
///
/// Attempt `k` (1-based) sleeps `base · 2^(k-1)` before retrying, with up
/// to ±25 % random jitter. Only error kinds for which
/// [`CoreError::is_retryable`] holds are re-attempted; everything else
/// propagates from the first failure.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_limits(limits: &Limits) -> Self {
        Self::new(limits.max_attempts, Duration::from_millis(limits.base_delay_ms))
    }

    /// A policy that never sleeps and never retries; used by tests and by
    /// call sites that handle transient failures themselves.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut attempt = 1u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, self.max_attempts, error, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .as_millis()
            .saturating_mul(1u128 << (attempt.saturating_sub(1)).min(16)) as f64;
        let jitter = rand::thread_rng().gen_range(-0.25..=0.25);
        Duration::from_millis((exponential * (1.0 + jitter)).max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_non_retryable_error_invoked_exactly_once() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);

        let result: Result<(), CoreError> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CoreError::invalid_argument("bad input")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retryable_error_retried_up_to_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);

        let result: Result<(), CoreError> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CoreError::rate_limited("429")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);

        let result = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(CoreError::connection_unavailable("flaky"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1000));
        let first = policy.delay_for_attempt(1).as_millis();
        let third = policy.delay_for_attempt(3).as_millis();
        // 1000 ± 25% and 4000 ± 25% never overlap.
        assert!(first <= 1250);
        assert!(third >= 3000);
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }
}
