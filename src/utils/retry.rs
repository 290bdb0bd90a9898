// Retry logic with server-provided delay hint support
// Author: kelexine (https://github.com/kelexine)

use crate::error::GuardError;
use backoff::{backoff::Backoff, ExponentialBackoff};
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of attempts, including the first one.
pub const MAX_ATTEMPTS: u32 = 5;

/// Upper bound for any server-provided delay hint.
const MAX_HINT: Duration = Duration::from_secs(60);

/// Errors that can tell the retry loop whether, and when, to try again.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Delay requested by the other side, if any.
    fn retry_hint(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for GuardError {
    fn is_retryable(&self) -> bool {
        match self {
            GuardError::RateLimitExceeded { .. } => true,
            GuardError::Upstream { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    fn retry_hint(&self) -> Option<Duration> {
        self.retry_after().map(Duration::from_secs)
    }
}

/// Create exponential backoff configuration for retries
pub fn create_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: Duration::from_millis(500),     // Start at 500ms
        initial_interval: Duration::from_millis(500),
        randomization_factor: 0.3,                         // Add jitter
        multiplier: 2.0,                                  // Double each time
        max_interval: Duration::from_secs(30),            // Cap at 30s
        max_elapsed_time: Some(Duration::from_secs(120)), // Give up after 2 minutes
        ..Default::default()
    }
}

/// Determine if an HTTP status code is retryable
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Delay to wait before the next attempt: the server hint when present
/// (capped at 60s), otherwise the next exponential backoff step.
fn next_delay<E: Retryable>(error: &E, backoff: &mut ExponentialBackoff) -> Duration {
    match error.retry_hint() {
        Some(hint) => hint.min(MAX_HINT),
        None => backoff.next_backoff().unwrap_or(Duration::from_secs(30)),
    }
}

/// Execute operation with retry logic
/// - Uses the error's own retry hint if available
/// - Falls back to exponential backoff
/// - Gives up after `max_attempts` or on a non-retryable error
pub async fn with_retry<F, Fut, T, E>(
    operation_name: &str,
    max_attempts: u32,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut backoff = create_backoff();
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(error) => {
                if !error.is_retryable() || attempt >= max_attempts {
                    if attempt > 1 {
                        warn!(
                            "{} giving up after {} attempts: {}",
                            operation_name, attempt, error
                        );
                    }
                    return Err(error);
                }

                let delay = next_delay(&error, &mut backoff);
                debug!(
                    "{} failed (attempt {}): {}; retrying after {}ms",
                    operation_name,
                    attempt,
                    error,
                    delay.as_millis()
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Tier;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn upstream(status: u16, retry_after_seconds: Option<u64>) -> GuardError {
        GuardError::Upstream {
            status,
            message: "boom".to_string(),
            retry_after_seconds,
        }
    }

    #[test]
    fn test_is_retryable_status() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(502));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn test_guard_error_retry_classification() {
        assert!(upstream(503, None).is_retryable());
        assert!(!upstream(401, None).is_retryable());
        assert!(!GuardError::KeyInactive("abc".to_string()).is_retryable());

        let limited = GuardError::RateLimitExceeded {
            tier: Tier::Free,
            hourly_remaining: 10,
            minute_remaining: 0,
            retry_after_seconds: 42,
        };
        assert!(limited.is_retryable());
        assert_eq!(limited.retry_hint(), Some(Duration::from_secs(42)));
    }

    #[test]
    fn test_hint_is_capped() {
        let mut backoff = create_backoff();
        let delay = next_delay(&upstream(429, Some(3600)), &mut backoff);
        assert_eq!(delay, MAX_HINT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u32, GuardError> = with_retry("flaky", MAX_ATTEMPTS, move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(upstream(503, Some(1)))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_fast() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), GuardError> = with_retry("fatal", MAX_ATTEMPTS, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(upstream(404, None))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), GuardError> = with_retry("down", 3, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(upstream(502, None))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
