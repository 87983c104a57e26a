use crate::config::{RetryConfig, RetryOn};
use crate::outbound::UpstreamError;
use std::fmt;
use std::future::Future;
use tokio::time::{Duration, sleep};

/// Outcome of one attempt, as recorded in a [`RetryAttempt`].
#[derive(Clone, Debug, PartialEq)]
pub enum AttemptOutcome {
    Success,
    RetryableError(String),
    TerminalError(String),
}

/// One attempt driven by the policy. Only ever logged.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryAttempt {
    pub index: u32,
    /// Backoff slept after this attempt; zero when no further attempt follows.
    pub delay: Duration,
    pub outcome: AttemptOutcome,
}

impl fmt::Display for RetryAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::Success => write!(f, "attempt {} succeeded", self.index),
            AttemptOutcome::RetryableError(e) => write!(
                f,
                "attempt {} failed ({e}), retrying in {:?}",
                self.index, self.delay
            ),
            AttemptOutcome::TerminalError(e) => {
                write!(f, "attempt {} failed ({e}), giving up", self.index)
            }
        }
    }
}

/// Bounded retry with exponential backoff.
///
/// Between attempt `i` (0-indexed) and `i + 1` the policy sleeps
/// `base_delay * 2^i`. When every attempt fails, the last error is returned.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    retry_on: RetryOn,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, retry_on: RetryOn) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
            retry_on,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff slept after the failed attempt `attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(attempt))
    }

    fn should_retry(&self, error: &UpstreamError) -> bool {
        match self.retry_on {
            RetryOn::AnyError => true,
            RetryOn::TransientOnly => error.is_transient(),
        }
    }

    /// Runs `attempt_fn` until it succeeds, fails terminally, or attempts run out.
    /// The closure receives the 0-based attempt index.
    pub async fn run<T, F, Fut>(&self, mut attempt_fn: F) -> Result<T, UpstreamError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut attempt = 0;

        loop {
            let error = match attempt_fn(attempt).await {
                Ok(value) => {
                    tracing::debug!(
                        "{}",
                        RetryAttempt {
                            index: attempt,
                            delay: Duration::ZERO,
                            outcome: AttemptOutcome::Success,
                        }
                    );
                    return Ok(value);
                }
                Err(error) => error,
            };

            let is_last = attempt + 1 >= self.max_attempts;
            if is_last || !self.should_retry(&error) {
                tracing::warn!(
                    "{}",
                    RetryAttempt {
                        index: attempt,
                        delay: Duration::ZERO,
                        outcome: AttemptOutcome::TerminalError(error.to_string()),
                    }
                );
                return Err(error);
            }

            let delay = self.delay_after(attempt);
            tracing::info!(
                "{}",
                RetryAttempt {
                    index: attempt,
                    delay,
                    outcome: AttemptOutcome::RetryableError(error.to_string()),
                }
            );

            sleep(delay).await;
            attempt += 1;
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            config.retry_on,
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn server_error() -> UpstreamError {
        UpstreamError::HttpStatus(StatusCode::INTERNAL_SERVER_ERROR)
    }

    #[test]
    fn test_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_after(0), Duration::from_millis(200));
        assert_eq!(policy.delay_after(1), Duration::from_millis(400));
        assert_eq!(policy.delay_after(2), Duration::from_millis(800));
    }

    #[test]
    fn test_attempt_display() {
        let attempt = RetryAttempt {
            index: 1,
            delay: Duration::from_millis(400),
            outcome: AttemptOutcome::RetryableError("boom".into()),
        };
        assert_eq!(
            attempt.to_string(),
            "attempt 1 failed (boom), retrying in 400ms"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts_with_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_millis(200), RetryOn::AnyError);
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), _> = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(server_error()) }
            })
            .await;

        assert_eq!(result, Err(server_error()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 200ms + 400ms between the three attempts, no sleep after the last
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(600));
        assert!(elapsed < Duration::from_millis(1400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), RetryOn::AnyError);

        let result: Result<(), _> = policy
            .run(|attempt| async move {
                Err(UpstreamError::Business(format!("E{attempt}")))
            })
            .await;

        assert_eq!(result, Err(UpstreamError::Business("E2".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_failures() {
        let policy = RetryPolicy::default();
        let start = Instant::now();

        let result = policy
            .run(|attempt| async move {
                if attempt < 2 {
                    Err(server_error())
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert!(start.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_first_success_does_not_sleep() {
        let policy = RetryPolicy::new(3, Duration::from_secs(60), RetryOn::AnyError);
        let result = policy.run(|_| async { Ok::<_, UpstreamError>("done") }).await;
        assert_eq!(result, Ok("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_any_error_retries_business_errors() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), RetryOn::AnyError);
        let calls = AtomicU32::new(0);

        let _: Result<(), _> = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(UpstreamError::Business("E999".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_only_stops_on_terminal_error() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), RetryOn::TransientOnly);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(UpstreamError::Business("E999".into())) }
            })
            .await;

        assert_eq!(result, Err(UpstreamError::Business("E999".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Transient failures are still retried
        calls.store(0, Ordering::SeqCst);
        let _: Result<(), _> = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(UpstreamError::HttpStatus(StatusCode::TOO_MANY_REQUESTS)) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
