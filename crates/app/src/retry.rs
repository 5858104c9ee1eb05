//! Bounded retry with exponential backoff.
//!
//! Used for subscription setup against the controller and for log appends.
//! The delay for attempt `n` is `first × factor^n`, clamped to `max`.

use std::future::Future;
use std::time::Duration;

/// How retry delays grow after repeated failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Multiplicative growth factor.
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(200),
            max: Duration::from_secs(10),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait before retry number `attempt` (0-indexed).
    #[must_use]
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// A bounded number of attempts separated by [`BackoffPolicy`] delays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `0` is treated as `1`.
    pub attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    #[must_use]
    pub fn once() -> Self {
        Self {
            attempts: 1,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Run `op` until it succeeds, `retryable` rejects the error or the
    /// attempts are used up. The last error is returned.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt.
    pub async fn run<T, E, F, Fut>(
        &self,
        what: &str,
        retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < attempts && retryable(&err) => {
                    let delay = self.backoff.next(attempt);
                    tracing::warn!(
                        what,
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
