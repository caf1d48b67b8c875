//! Retry policy with exponential backoff and jitter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::CollaboratorError;

/// Retry policy for collaborator calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound on the exponential part of the delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Ceiling of the uniform random jitter added to each delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Policy for compensation calls: more attempts, longer delays.
    pub fn for_compensation() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: Duration::from_millis(250),
        }
    }

    /// A policy that never waits. Used by tests and benchmarks.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter: Duration::ZERO,
        }
    }

    /// Delay after failed attempt `attempt` (1-indexed), without jitter.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = delay.min(self.max_backoff.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    /// Delay after failed attempt `attempt`, with uniform jitter in `[0, jitter]`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt);
        let jitter_ms = self.jitter.as_millis().min(u64::MAX as u128) as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Decides whether a failure is worth another attempt.
pub type RetryPredicate = Arc<dyn Fn(&CollaboratorError) -> bool + Send + Sync>;

/// Retries transient failures and timeouts.
pub fn default_predicate() -> RetryPredicate {
    Arc::new(CollaboratorError::is_retryable)
}

/// Final result of a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    pub result: Result<T, CollaboratorError>,
    /// Attempts actually made.
    pub attempts: u32,
}

/// Runs `op` until it succeeds, fails non-retryably, or the attempt budget is spent.
///
/// `op` receives the 1-indexed attempt number. The wait between attempts
/// ends early with [`CollaboratorError::Cancelled`] when `cancel` fires.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    predicate: &RetryPredicate,
    cancel: &CancellationToken,
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return RetryOutcome {
                result: Err(CollaboratorError::Cancelled),
                attempts: attempt,
            };
        }

        attempt += 1;
        let error = match op(attempt).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(error) => error,
        };

        if error.is_cancelled() || !predicate(&error) || attempt >= max_attempts {
            return RetryOutcome {
                result: Err(error),
                attempts: attempt,
            };
        }

        let delay = policy.backoff_for(attempt);
        tracing::debug!(attempt, ?delay, %error, "retrying after backoff");
        tokio::select! {
            _ = cancel.cancelled() => {
                return RetryOutcome {
                    result: Err(CollaboratorError::Cancelled),
                    attempts: attempt,
                };
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    #[test]
    fn test_exponential_growth_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.base_backoff(1), Duration::from_millis(100));
        assert_eq!(policy.base_backoff(2), Duration::from_millis(200));
        assert_eq!(policy.base_backoff(3), Duration::from_millis(400));
        assert_eq!(policy.base_backoff(4), Duration::from_millis(500));
        assert_eq!(policy.base_backoff(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_ceiling() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.backoff_for(1);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(300));
        }
    }

    #[test]
    fn test_compensation_preset_is_more_patient() {
        let forward = RetryPolicy::default();
        let compensation = RetryPolicy::for_compensation();
        assert!(compensation.max_attempts > forward.max_attempts);
        assert!(compensation.initial_backoff > forward.initial_backoff);
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let outcome = retry(
            &RetryPolicy::immediate(3),
            &default_predicate(),
            &CancellationToken::new(),
            move |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CollaboratorError::Transient("503".into()))
                } else {
                    Ok("done")
                }
            },
        )
        .await;
        assert_eq!(outcome.result, Ok("done"));
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let outcome: RetryOutcome<()> = retry(
            &RetryPolicy::immediate(2),
            &default_predicate(),
            &CancellationToken::new(),
            |_| async { Err(CollaboratorError::Transient("503".into())) },
        )
        .await;
        assert_eq!(outcome.attempts, 2);
        assert!(matches!(outcome.result, Err(CollaboratorError::Transient(_))));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let outcome: RetryOutcome<()> = retry(
            &RetryPolicy::immediate(5),
            &default_predicate(),
            &CancellationToken::new(),
            |_| async { Err(CollaboratorError::Permanent("rejected".into())) },
        )
        .await;
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_custom_predicate() {
        let never: RetryPredicate = Arc::new(|_| false);
        let outcome: RetryOutcome<()> = retry(
            &RetryPolicy::immediate(5),
            &never,
            &CancellationToken::new(),
            |_| async { Err(CollaboratorError::Transient("503".into())) },
        )
        .await;
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_backoff_wait() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(60),
            multiplier: 1.0,
            jitter: Duration::ZERO,
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome: RetryOutcome<()> = retry(&policy, &default_predicate(), &cancel, |_| async {
            Err(CollaboratorError::Transient("503".into()))
        })
        .await;

        assert_eq!(outcome.result, Err(CollaboratorError::Cancelled));
        assert_eq!(outcome.attempts, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome: RetryOutcome<()> = retry(
            &RetryPolicy::immediate(3),
            &default_predicate(),
            &cancel,
            |_| async { Ok(()) },
        )
        .await;
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.result, Err(CollaboratorError::Cancelled));
    }
}
