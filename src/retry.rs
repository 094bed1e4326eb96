//! # Retry Policy
//!
//! Bounded exponential backoff with optional full jitter, used for upstream
//! fetches. Only errors that report themselves as retryable are retried;
//! everything else is returned on the first failure.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Upper bound for a single backoff sleep.
const MAX_DELAY: Duration = Duration::from_secs(30);

/// How the computed backoff interval is randomized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Sleep a uniformly random duration between zero and the computed interval
    #[default]
    Full,
    /// Sleep exactly the computed interval
    None,
}

/// Errors that can tell the retry loop whether another attempt may succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Retry settings: `max_attempts` counts the first call, so 3 means up to two retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff_rate: f64,
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_secs(1),
            backoff_rate: 2.0,
            jitter: JitterStrategy::Full,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Un-jittered interval before retry number `retry` (1-based).
    pub fn ceiling(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let millis = self.interval.as_millis() as f64 * self.backoff_rate.powi(exponent);
        Duration::from_millis(millis.min(MAX_DELAY.as_millis() as f64) as u64)
    }

    /// Delay before retry number `retry` with jitter applied.
    pub fn delay_for<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let ceiling = self.ceiling(retry);
        match self.jitter {
            JitterStrategy::None => ceiling,
            JitterStrategy::Full => {
                let max_ms = ceiling.as_millis() as u64;
                if max_ms == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_millis(rng.gen_range(0..=max_ms))
                }
            }
        }
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent. The closure receives the 1-based attempt number.
    pub async fn retry<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => {
                    debug!(attempt, error = %err, "Non-retryable failure; giving up");
                    return Err(err);
                }
                Err(err) if attempt >= max_attempts => {
                    warn!(attempt, error = %err, "Retry attempts exhausted");
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.delay_for(attempt, &mut rand::thread_rng());
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Attempt failed; retrying after backoff"
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
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (retryable: {})", self.retryable)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            interval: Duration::from_millis(1),
            backoff_rate: 2.0,
            jitter: JitterStrategy::None,
        }
    }

    #[test]
    fn ceiling_doubles_from_base_interval() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.ceiling(1), Duration::from_secs(1));
        assert_eq!(policy.ceiling(2), Duration::from_secs(2));
        assert_eq!(policy.ceiling(3), Duration::from_secs(4));
    }

    #[test]
    fn ceiling_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.ceiling(20), MAX_DELAY);
    }

    #[test]
    fn full_jitter_stays_within_ceiling() {
        let policy = RetryPolicy::default();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        for retry in 1..=4 {
            for _ in 0..50 {
                let delay = policy.delay_for(retry, &mut rng);
                assert!(delay <= policy.ceiling(retry));
            }
        }
    }

    #[test]
    fn no_jitter_uses_exact_ceiling() {
        let policy = RetryPolicy {
            jitter: JitterStrategy::None,
            ..RetryPolicy::default()
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        assert_eq!(policy.delay_for(2, &mut rng), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .retry(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(TestError { retryable: true })
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = fast_policy(3)
            .retry(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError { retryable: true }) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = fast_policy(5)
            .retry(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError { retryable: false }) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn none_policy_calls_once() {
        let calls = AtomicU32::new(0);
        let _: Result<(), TestError> = RetryPolicy::none()
            .retry(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError { retryable: true }) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
