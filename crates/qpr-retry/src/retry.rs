// SPDX-License-Identifier: MIT OR Apache-2.0
//! Retry policy (spec §4.4.2): only transient failures retry, exponential
//! backoff with full jitter, bypassed once the remaining deadline budget
//! can't absorb the next delay.

use std::future::Future;
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};

/// Configuration for the Agent Runtime's retry behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (default 3).
    pub max_attempts: u32,
    /// Base delay for exponential backoff (default 250ms).
    pub base_delay: Duration,
    /// Cap on any single backoff delay (default 5s).
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Record of one failed attempt.
#[derive(Debug, Clone)]
pub struct FailedAttempt {
    /// Zero-indexed attempt number.
    pub attempt: u32,
    /// Error message from this attempt.
    pub error: String,
    /// Backoff delay applied before the next attempt, if one was taken.
    pub delay: Option<Duration>,
}

/// Metadata captured across all attempts of one retried invocation,
/// surfaced in the step's trace entry (spec §4.4.2).
#[derive(Debug, Clone, Default)]
pub struct RetryMetadata {
    /// Total number of attempts made (including the successful one, if any).
    pub total_attempts: u32,
    /// Records of each failed attempt.
    pub failed_attempts: Vec<FailedAttempt>,
}

/// Outcome of a retry-governed operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The successfully produced value.
    pub value: T,
    /// Metadata about attempts made before success.
    pub metadata: RetryMetadata,
}

/// Full-jitter exponential backoff delay for a zero-indexed `attempt`.
///
/// `base * 2^attempt`, capped at `max_delay`, then scaled down by a
/// uniform random factor in `[0, 1]` (i.e. "full jitter": the returned
/// delay is anywhere from zero up to the capped nominal value).
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    let nominal_ms = (policy.base_delay.as_millis() as u64).saturating_mul(exp);
    let capped_ms = nominal_ms.min(policy.max_delay.as_millis() as u64);
    if capped_ms == 0 {
        return Duration::from_millis(0);
    }
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let pseudo = nanos.wrapping_mul(attempt as u64 * 2 + 1);
    let jittered_ms = pseudo % (capped_ms + 1);
    Duration::from_millis(jittered_ms)
}

/// Run `op` up to `policy.max_attempts` times, retrying only when
/// `retryable` returns `true` for the error, and only while `remaining`
/// deadline budget covers the next backoff delay (spec §4.4.2: "retry is
/// bypassed if the remaining `ctx.timeout` budget is smaller than the
/// next backoff delay").
pub async fn retry_async<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut remaining: Duration,
    mut op: F,
    retryable: impl Fn(&E) -> bool,
) -> Result<RetryOutcome<T>, (E, RetryMetadata)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut failed_attempts = Vec::new();

    for attempt in 0..policy.max_attempts {
        let attempt_start = Instant::now();
        match op().await {
            Ok(value) => {
                return Ok(RetryOutcome {
                    value,
                    metadata: RetryMetadata {
                        total_attempts: attempt + 1,
                        failed_attempts,
                    },
                });
            }
            Err(err) => {
                let is_last = attempt + 1 >= policy.max_attempts;
                if !retryable(&err) || is_last {
                    failed_attempts.push(FailedAttempt {
                        attempt,
                        error: err.to_string(),
                        delay: None,
                    });
                    tracing::debug!(
                        target: "qpr.retry",
                        attempt,
                        retryable = retryable(&err),
                        "giving up"
                    );
                    return Err((
                        err,
                        RetryMetadata {
                            total_attempts: attempt + 1,
                            failed_attempts,
                        },
                    ));
                }

                let delay = backoff_delay(policy, attempt);
                remaining = remaining.saturating_sub(attempt_start.elapsed());
                if delay > remaining {
                    tracing::debug!(target: "qpr.retry", attempt, "retry bypassed: insufficient deadline budget");
                    failed_attempts.push(FailedAttempt {
                        attempt,
                        error: err.to_string(),
                        delay: None,
                    });
                    return Err((
                        err,
                        RetryMetadata {
                            total_attempts: attempt + 1,
                            failed_attempts,
                        },
                    ));
                }

                failed_attempts.push(FailedAttempt {
                    attempt,
                    error: err.to_string(),
                    delay: Some(delay),
                });
                tokio::time::sleep(delay).await;
                remaining = remaining.saturating_sub(delay);
            }
        }
    }

    unreachable!("loop always returns within max_attempts iterations")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_delay_never_exceeds_cap() {
        let policy = RetryPolicy::default();
        for attempt in 0..10 {
            let d = backoff_delay(&policy, attempt);
            assert!(d <= policy.max_delay);
        }
    }

    mod property {
        use super::*;
        use proptest::prelude::*;

        // Full-jitter backoff is bounded above by `max_delay` and below by
        // zero for any policy/attempt combination, never panics on
        // overflow at high attempt counts, and a zero cap always yields
        // zero delay.
        proptest! {
            #[test]
            fn backoff_delay_bounded_for_arbitrary_policy_and_attempt(
                base_ms in 0u64..10_000,
                max_ms in 0u64..20_000,
                attempt in 0u32..64,
            ) {
                let policy = RetryPolicy {
                    max_attempts: 3,
                    base_delay: Duration::from_millis(base_ms),
                    max_delay: Duration::from_millis(max_ms),
                };
                let d = backoff_delay(&policy, attempt);
                prop_assert!(d <= policy.max_delay);
                if max_ms == 0 {
                    prop_assert_eq!(d, Duration::ZERO);
                }
            }
        }
    }

    #[tokio::test]
    async fn succeeds_immediately_without_retry() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let outcome: Result<RetryOutcome<i32>, (String, RetryMetadata)> = retry_async(
            &policy,
            Duration::from_secs(10),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<i32, String>(42) }
            },
            |_: &String| true,
        )
        .await;
        let outcome = outcome.unwrap();
        assert_eq!(outcome.value, 42);
        assert_eq!(outcome.metadata.total_attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let calls = AtomicU32::new(0);
        let outcome = retry_async(
            &policy,
            Duration::from_secs(10),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err::<i32, String>("transient".to_string())
                    } else {
                        Ok(99)
                    }
                }
            },
            |_: &String| true,
        )
        .await
        .unwrap();
        assert_eq!(outcome.value, 99);
        assert_eq!(outcome.metadata.total_attempts, 3);
    }

    #[tokio::test]
    async fn non_retryable_error_gives_up_immediately() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let err = retry_async(
            &policy,
            Duration::from_secs(10),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, String>("permanent".to_string()) }
            },
            |_: &String| false,
        )
        .await
        .unwrap_err();
        assert_eq!(err.1.total_attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let err = retry_async(
            &policy,
            Duration::from_secs(10),
            || async { Err::<i32, String>("always fails".to_string()) },
            |_: &String| true,
        )
        .await
        .unwrap_err();
        assert_eq!(err.1.total_attempts, 3);
    }

    #[tokio::test]
    async fn retry_bypassed_when_remaining_budget_too_small() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(10),
        };
        let calls = AtomicU32::new(0);
        let err = retry_async(
            &policy,
            Duration::from_millis(1),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, String>("transient".to_string()) }
            },
            |_: &String| true,
        )
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.1.total_attempts, 1);
    }
}
