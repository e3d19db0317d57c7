//! Retry + timeout policy wrapping every I/O-bound connector call (spec
//! §4.1): default 3 attempts, 200ms exponential backoff, 5s timeout.
//! Operations exceeding the budget fail `TIMEOUT`; connection refusal after
//! retries exhaust fails `UNAVAILABLE`.
//!
//! Grounded on `services/adapters/src/circuit_breaker.rs`'s
//! atomics-and-`Duration` style, generalized from a per-connector circuit
//! breaker into a reusable combinator any connector method can wrap a
//! future with.

use std::future::Future;
use std::time::Duration;

use arb_types::{ArbError, VenueId};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: u32,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
            backoff_multiplier: 2,
            timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * self.backoff_multiplier.saturating_pow(attempt)
    }
}

/// Run `op` under `policy`: each attempt is bounded by `policy.timeout`; on
/// failure the caller backs off exponentially and retries up to
/// `policy.attempts` times. The final failure is classified `Timeout` (the
/// last attempt itself timed out) or `Unavailable` (the venue kept
/// refusing/erroring within the timeout).
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    venue: &VenueId,
    operation: &str,
    mut op: F,
) -> Result<T, ArbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_was_timeout = false;
    let mut last_reason = String::new();

    for attempt in 0..policy.attempts {
        let started = std::time::Instant::now();
        match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => {
                last_was_timeout = false;
                last_reason = err.to_string();
                warn!(
                    venue = %venue,
                    operation,
                    attempt,
                    error = %last_reason,
                    "connector operation failed, will retry if attempts remain"
                );
            }
            Err(_elapsed) => {
                last_was_timeout = true;
                last_reason = format!("exceeded {:?}", policy.timeout);
                debug!(venue = %venue, operation, attempt, "connector operation timed out");
            }
        }

        if attempt + 1 < policy.attempts {
            tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
        } else {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            return if last_was_timeout {
                Err(ArbError::Timeout {
                    venue: venue.clone(),
                    operation: operation.to_string(),
                    elapsed_ms,
                })
            } else {
                Err(ArbError::Unavailable {
                    venue: venue.clone(),
                    reason: last_reason,
                })
            };
        }
    }

    unreachable!("retry loop always returns on its final attempt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_ok() {
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_multiplier: 2,
            timeout: Duration::from_millis(50),
        };
        let venue = VenueId::new("binance");
        let calls = AtomicU32::new(0);

        let result: Result<i32, ArbError> = retry(&policy, &venue, "get_ticker", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<i32, String>(42)
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausting_retries_on_errors_yields_unavailable() {
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_multiplier: 1,
            timeout: Duration::from_millis(50),
        };
        let venue = VenueId::new("binance");
        let calls = AtomicU32::new(0);

        let result: Result<i32, ArbError> = retry(&policy, &venue, "get_ticker", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<i32, String>("connection refused".into())
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(result.unwrap_err(), ArbError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn exhausting_retries_on_timeout_yields_timeout_kind() {
        let policy = RetryPolicy {
            attempts: 2,
            base_delay: Duration::from_millis(1),
            backoff_multiplier: 1,
            timeout: Duration::from_millis(10),
        };
        let venue = VenueId::new("kraken");

        let result: Result<i32, ArbError> = retry(&policy, &venue, "get_ticker", || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<i32, String>(0)
        })
        .await;

        assert!(matches!(result.unwrap_err(), ArbError::Timeout { .. }));
    }
}
