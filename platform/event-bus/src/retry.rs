//! Retry helper with fixed or exponential backoff
//!
//! Used by saga compensation (fixed delay) and by event consumers that want
//! a few in-process attempts before handing a message to the DLQ.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Cap on the delay between attempts
    pub max_backoff: Duration,
    /// Whether the delay doubles on each retry
    pub exponential: bool,
}

impl RetryPolicy {
    /// Retry with the same delay between every attempt.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff: delay,
            max_backoff: delay,
            exponential: false,
        }
    }

    /// Retry with a doubling delay, capped at `max_backoff`.
    pub fn exponential(max_attempts: u32, initial: Duration, cap: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff: initial,
            max_backoff: cap,
            exponential: true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(100), Duration::from_secs(30))
    }
}

/// Retry a fallible async operation according to a policy.
///
/// # Arguments
/// * `operation` - The async operation to retry
/// * `policy` - Retry configuration
/// * `context` - Context string for logging (e.g., "compensate:CREATE_ORDER")
///
/// # Returns
/// * `Ok(T)` if the operation succeeds within `max_attempts`
/// * `Err(E)` with the last error once attempts are exhausted
pub async fn retry_with_policy<F, Fut, T, E>(
    operation: F,
    policy: &RetryPolicy,
    context: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + Send,
{
    let mut attempt = 0;
    let mut backoff = policy.initial_backoff;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(context = %context, attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= policy.max_attempts {
                    warn!(
                        context = %context,
                        attempts = attempt,
                        error = %e,
                        "operation failed after max attempts"
                    );
                    return Err(e);
                }

                warn!(
                    context = %context,
                    attempt,
                    max_attempts = policy.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "operation failed, retrying"
                );

                sleep(backoff).await;

                if policy.exponential {
                    backoff = std::cmp::min(backoff * 2, policy.max_backoff);
                }
            }
        }
    }
}
