//! Retry with exponential backoff for mutating cloud calls.
//!
//! Two variants: [`retry`] blindly retries every error, [`retry_classified`]
//! only retries errors whose message matches the transient vocabulary and
//! adds jitter so concurrent lifecycle operations don't thunder in step.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Message fragments that identify a transient provider error. Matched
/// case-insensitively against the error's display form.
const RETRYABLE_PATTERNS: &[&str] = &[
    "rate limit",
    "ratelimit",
    "requestlimitexceeded",
    "throttl",
    "service unavailable",
    "serviceunavailable",
    "internal error",
    "internalerror",
    "connection reset",
    "connectionreset",
    "timed out",
    "timeout",
];

/// Whether an error message looks transient.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }
}

/// Error from [`retry_classified`].
#[derive(Error, Debug, PartialEq)]
pub enum RetryError<E> {
    #[error(transparent)]
    Operation(E),

    /// The deadline elapsed before the operation succeeded.
    #[error("{operation} cancelled: deadline elapsed")]
    DeadlineElapsed { operation: String },
}

impl<E> RetryError<E> {
    pub fn into_operation(self) -> Option<E> {
        match self {
            RetryError::Operation(e) => Some(e),
            RetryError::DeadlineElapsed { .. } => None,
        }
    }
}

/// Retry every error up to `max_attempts`, doubling the delay each attempt
/// (capped at `max_delay`). The final error is returned verbatim.
pub async fn retry<T, E, F, Fut>(
    mut operation: F,
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut delay = initial_delay;
    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt == max_attempts => return Err(e),
            Err(e) => {
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        }
    }
    unreachable!("max_attempts is at least 1")
}

/// Retry only transient errors, with jitter and an optional deadline.
///
/// Non-retryable errors abort after exactly one invocation. Jitter is
/// uniform over `[0, delay / 2)` on top of the exponential delay. A deadline
/// that elapses mid-sleep aborts immediately and surfaces as
/// [`RetryError::DeadlineElapsed`] rather than the operation's error.
pub async fn retry_classified<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    deadline: Option<Instant>,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let expired = |now: Instant| deadline.is_some_and(|d| now >= d);

    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    for attempt in 1..=max_attempts {
        if expired(Instant::now()) {
            return Err(RetryError::DeadlineElapsed {
                operation: operation_name.to_string(),
            });
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !is_retryable_message(&e.to_string()) => {
                debug!(operation = operation_name, error = %e, "non-retryable error");
                return Err(RetryError::Operation(e));
            }
            Err(e) if attempt == max_attempts => {
                warn!(operation = operation_name, attempt, error = %e, "attempts exhausted");
                return Err(RetryError::Operation(e));
            }
            Err(e) => {
                let half = delay / 2;
                let jitter = if half.is_zero() {
                    Duration::ZERO
                } else {
                    rand::thread_rng().gen_range(Duration::ZERO..half)
                };
                let sleep_for = delay + jitter;
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = sleep_for.as_millis() as u64,
                    error = %e,
                    "transient error, retrying"
                );

                let wake = Instant::now() + sleep_for;
                match deadline {
                    Some(d) if d < wake => {
                        tokio::time::sleep_until(d).await;
                        return Err(RetryError::DeadlineElapsed {
                            operation: operation_name.to_string(),
                        });
                    }
                    _ => tokio::time::sleep_until(wake).await,
                }

                delay = (delay * 2).min(policy.max_delay);
            }
        }
    }
    unreachable!("max_attempts is at least 1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        }
    }

    #[tokio::test]
    async fn retry_succeeds_after_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let start = std::time::Instant::now();
        let result: Result<u32, String> = retry(
            || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(7)
                    }
                }
            },
            5,
            Duration::from_millis(10),
            Duration::from_millis(40),
        )
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(count.load(Ordering::SeqCst), 3);
        // two sleeps: 10ms + 20ms
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn retry_returns_final_error_verbatim() {
        let result: Result<(), String> = retry(
            || async { Err("always broken".to_string()) },
            3,
            Duration::from_millis(1),
            Duration::from_millis(4),
        )
        .await;

        assert_eq!(result, Err("always broken".to_string()));
    }

    #[tokio::test]
    async fn non_retryable_invoked_exactly_once() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<(), RetryError<String>> =
            retry_classified(&fast_policy(), "create-vpc", None, || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("InvalidParameterValue: bad cidr".to_string())
                }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Operation(_))));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_error_retried_with_backoff_lower_bound() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let start = std::time::Instant::now();
        let result: Result<u32, RetryError<String>> =
            retry_classified(&fast_policy(), "run-instances", None, || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("RequestLimitExceeded: throttling".to_string())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert!(matches!(result, Ok(42)));
        assert_eq!(count.load(Ordering::SeqCst), 3);
        // jitter only adds on top of the base 10ms + 20ms
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn deadline_elapsed_surfaces_as_cancellation() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let deadline = Instant::now() + Duration::from_millis(5);
        let result: Result<(), RetryError<String>> = retry_classified(
            &RetryPolicy {
                max_attempts: 10,
                initial_delay: Duration::from_millis(50),
                max_delay: Duration::from_millis(200),
            },
            "describe-instances",
            Some(deadline),
            || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("timeout talking to endpoint".to_string())
                }
            },
        )
        .await;

        assert!(matches!(result, Err(RetryError::DeadlineElapsed { .. })));
        // only the first attempt ran; the deadline cut the first sleep short
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retryable_vocabulary() {
        assert!(is_retryable_message("RequestLimitExceeded: slow down"));
        assert!(is_retryable_message("Throttling: Rate exceeded"));
        assert!(is_retryable_message("503 Service Unavailable"));
        assert!(is_retryable_message("InternalError: try again"));
        assert!(is_retryable_message("connection reset by peer"));
        assert!(is_retryable_message("request timed out"));
        assert!(!is_retryable_message("InvalidGroup.NotFound"));
        assert!(!is_retryable_message("UnauthorizedOperation"));
    }
}
