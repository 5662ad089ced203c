//! Bounded retries with exponential backoff, per-attempt timeouts and deadlines.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

/// Wait between two attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `initial`, doubled after every failed attempt, never above `ceiling`.
    ///
    /// With `jitter` the actual wait is drawn uniformly from the upper half
    /// of that delay.
    Doubling {
        initial: Duration,
        ceiling: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Doubling {
            initial: Duration::from_millis(250),
            ceiling: Duration::from_secs(4),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Wait after the failure of `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        let (initial, ceiling, jitter) = match self {
            Self::Fixed(delay) => return delay,
            Self::Doubling {
                initial,
                ceiling,
                jitter,
            } => (initial, ceiling, jitter),
        };

        let scale = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let full = initial.checked_mul(scale).unwrap_or(ceiling).min(ceiling);
        if !jitter {
            return full;
        }
        let full_ms = u64::try_from(full.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(fastrand::u64(full_ms / 2..=full_ms))
    }
}

/// 408 and 429 plus every 5xx: worth asking again.
fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

/// Errors the retry loop knows how to classify and synthesize.
pub trait RetryableError: Sized {
    /// Whether another attempt may succeed.
    fn is_retryable(&self) -> bool;

    /// Error for an attempt that did not finish in time.
    ///
    /// `deadline` is true when the caller's deadline, not the per-attempt
    /// timeout, cut the attempt short.
    fn timed_out(operation: &str, after: Duration, deadline: bool) -> Self;

    /// Final error once every attempt has failed.
    fn exhausted(self, _attempts: u32) -> Self {
        self
    }
}

/// Retry settings for one class of calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Upper bound for a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(10))
    }
}

impl RetryPolicy {
    /// Doubling backoff with jitter.
    pub fn exponential(max_attempts: u32, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::default(),
            attempt_timeout,
        }
    }

    pub fn fixed(delay: Duration, max_attempts: u32, attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed(delay),
            attempt_timeout,
        }
    }

    /// Whether a download that answered `status` may succeed if attempted again.
    pub fn should_retry_status(&self, status: u16) -> bool {
        is_transient_status(status)
    }

    /// Run `call` until it succeeds, fails permanently, runs out of attempts,
    /// or reaches `deadline`.
    ///
    /// `call` receives the 0-based attempt number. A deadline expiry is
    /// reported through [`RetryableError::timed_out`] and is never retried.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        deadline: Option<Instant>,
        mut call: F,
    ) -> Result<T, E>
    where
        E: RetryableError + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let (budget, bounded_by_deadline) = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(E::timed_out(operation, Duration::ZERO, true));
                    }
                    if remaining < self.attempt_timeout {
                        (remaining, true)
                    } else {
                        (self.attempt_timeout, false)
                    }
                }
                None => (self.attempt_timeout, false),
            };

            let error = match tokio::time::timeout(budget, call(attempt)).await {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        debug!(operation, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(error)) if !error.is_retryable() => return Err(error),
                Ok(Err(error)) => error,
                Err(_) if bounded_by_deadline => {
                    return Err(E::timed_out(operation, budget, true));
                }
                Err(_) => E::timed_out(operation, budget, false),
            };

            attempt += 1;
            if attempt >= attempts {
                warn!(operation, attempts, error = %error, "retries exhausted");
                return Err(error.exhausted(attempts));
            }

            let delay = self.backoff.delay(attempt - 1);
            if let Some(deadline) = deadline {
                if Instant::now() + delay >= deadline {
                    return Err(E::timed_out(operation, delay, true));
                }
            }
            warn!(
                operation,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Flaky,
        Fatal,
        SlowAttempt,
        Deadline,
        GaveUp(u32),
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl RetryableError for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, Self::Flaky | Self::SlowAttempt)
        }

        fn timed_out(_operation: &str, _after: Duration, deadline: bool) -> Self {
            if deadline {
                Self::Deadline
            } else {
                Self::SlowAttempt
            }
        }

        fn exhausted(self, attempts: u32) -> Self {
            Self::GaveUp(attempts)
        }
    }

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(1), attempts, Duration::from_millis(200))
    }

    #[test]
    fn fixed_backoff_ignores_the_attempt() {
        let backoff = Backoff::Fixed(Duration::from_millis(40));
        assert_eq!(backoff.delay(0), Duration::from_millis(40));
        assert_eq!(backoff.delay(9), Duration::from_millis(40));
    }

    #[test]
    fn doubling_backoff_stops_at_the_ceiling() {
        let backoff = Backoff::Doubling {
            initial: Duration::from_millis(250),
            ceiling: Duration::from_secs(2),
            jitter: false,
        };

        let delays: Vec<u128> = (0..6).map(|n| backoff.delay(n).as_millis()).collect();
        assert_eq!(delays, vec![250, 500, 1000, 2000, 2000, 2000]);
        assert_eq!(backoff.delay(200), Duration::from_secs(2));
    }

    #[test]
    fn jitter_keeps_the_upper_half() {
        let backoff = Backoff::Doubling {
            initial: Duration::from_millis(200),
            ceiling: Duration::from_secs(1),
            jitter: true,
        };

        for _ in 0..20 {
            for (attempt, full) in [(0, 200), (1, 400), (2, 800), (3, 1000)] {
                let waited = backoff.delay(attempt).as_millis();
                assert!((full / 2..=full).contains(&waited), "attempt {attempt}: {waited}");
            }
        }
    }

    #[test]
    fn only_transient_statuses_are_retried() {
        let policy = RetryPolicy::default();
        for status in [408, 429, 500, 502, 503, 504, 599] {
            assert!(policy.should_retry_status(status), "{status}");
        }
        for status in [400, 401, 403, 404, 410] {
            assert!(!policy.should_retry_status(status), "{status}");
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = quick(3)
            .run("flaky", None, |_| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 {
                        Err(TestError::Flaky)
                    } else {
                        Ok(call)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = quick(5)
            .run("fatal", None, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Fatal) }
            })
            .await;

        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_budget_reports_attempt_count() {
        let result: Result<(), _> = quick(3)
            .run("flaky", None, |_| async { Err(TestError::Flaky) })
            .await;

        assert_eq!(result, Err(TestError::GaveUp(3)));
    }

    #[tokio::test]
    async fn slow_attempts_count_as_transient() {
        let policy = RetryPolicy::fixed(Duration::from_millis(1), 2, Duration::from_millis(20));
        let result: Result<(), _> = policy
            .run("slow", None, |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert_eq!(result, Err(TestError::GaveUp(2)));
    }

    #[tokio::test]
    async fn deadline_stops_retrying() {
        let calls = AtomicU32::new(0);
        let deadline = Instant::now() + Duration::from_millis(50);
        let policy = RetryPolicy::fixed(Duration::from_millis(1), 10, Duration::from_secs(5));
        let result: Result<(), _> = policy
            .run("slow", Some(deadline), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            })
            .await;

        assert_eq!(result, Err(TestError::Deadline));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
