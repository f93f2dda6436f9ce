//! Bounded exponential backoff for transient connection failures.

use crate::config::RetryConfig;
use crate::error::SmaxError;
use crate::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy for store requests and subscriber reconnects.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries, not counting the first attempt.
    pub max_attempts: usize,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Creates an exponential policy doubling from `initial_backoff`.
    #[must_use]
    pub fn exponential(max_attempts: usize, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before retry number `attempt` (1-based); zero for attempt 0.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt as i32).saturating_sub(1);
        let delay = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()).max(0.0))
    }

    /// Returns true if another retry is allowed after `attempt` retries.
    #[must_use]
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().policy()
    }
}

/// Runs `op`, retrying connection errors with backoff.
///
/// Other errors are returned at once. `what` names the operation in logs.
///
/// # Errors
///
/// Returns the first non-connection error, or the last connection error once
/// the policy is exhausted.
pub async fn with_retry<F, T, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_connection() || !policy.should_retry(attempt) => return Err(e),
            Err(e) => {
                attempt += 1;
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "{} failed ({}), retry {}/{} in {:?}",
                    what, e, attempt, policy.max_attempts, delay
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Shorthand for an error raised once the reconnect budget is spent.
pub(crate) fn exhausted(what: &str, last: &SmaxError) -> SmaxError {
    SmaxError::connection(what, format!("gave up reconnecting: {last}"))
}
