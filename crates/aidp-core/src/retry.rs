//! Exponential-backoff retry executor.
//!
//! A direct translation of the original Python `retry_with_backoff` /
//! `retry_on_rate_limit` decorators (`original_source/utils/error_handlers.py`)
//! into a higher-order async function over a `Result`-returning closure,
//! per the design notes' "exceptions become result types" mapping.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

/// Backoff schedule for a retry executor.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl RetryPolicy {
    /// Standard policy: 3 retries, 1s base, 60s cap, base-2 backoff.
    pub const STANDARD: RetryPolicy = RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(60),
        exponential_base: 2.0,
    };

    /// Specialization for upstream-provider rate limiting: 5 retries, 60s
    /// base, 300s cap, base-1.5 backoff -- matches the original
    /// `retry_on_rate_limit` defaults exactly.
    pub const RATE_LIMIT: RetryPolicy = RetryPolicy {
        max_retries: 5,
        base_delay: Duration::from_secs(60),
        max_delay: Duration::from_secs(300),
        exponential_base: 1.5,
    };

    /// Delay before the `attempt`-th retry (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * self.exponential_base.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

/// Run `f` under `policy`, retrying on failure up to `max_retries` times.
///
/// Succeeding after one or more retries is logged at `info`; every failed
/// attempt is logged at `warn`. The final failure, if all attempts are
/// exhausted, is returned to the caller untouched.
pub async fn with_backoff<T, E, F, Fut>(
    operation_name: &str,
    policy: RetryPolicy,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(operation_name, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if attempt == policy.max_retries {
                    warn!(
                        operation_name,
                        attempts = attempt + 1,
                        error = %err,
                        "exhausted retries"
                    );
                    return Err(err);
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation_name,
                    attempt,
                    error = %err,
                    delay_secs = delay.as_secs_f64(),
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_schedule_caps_at_max() {
        let policy = RetryPolicy::RATE_LIMIT;
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(90));
        // 60 * 1.5^5 = 455.6s, capped at 300s.
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn succeeds_immediately_without_retrying() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_backoff("t", RetryPolicy::STANDARD, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let fast_policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 1.0,
        };
        let result: Result<u32, &str> = with_backoff("t", fast_policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("not yet")
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_and_returns_last_error() {
        let fast_policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            exponential_base: 1.0,
        };
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_backoff("t", fast_policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("always fails") }
        })
        .await;
        assert_eq!(result, Err("always fails"));
        assert_eq!(calls.load(Ordering::SeqCst), 3); // initial + 2 retries
    }
}
