//! Bounded retry for executor preparation and individual stages.
//!
//! Two policies exist: the prepare policy (fixed attempt count, fixed
//! inter-attempt delay) and the stage policy (attempt count read from a
//! variable, no delay). An operation is repeated only while its error is
//! classified retryable and the cancellation token has not fired.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::cancellation::CancelToken;
use crate::errors::RunnerError;

/// Attempt count used by the prepare policy.
pub const PREPARE_ATTEMPTS: u32 = 3;

/// Configuration for a bounded retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub interval: Duration,
    /// Randomize each delay in `0..=interval`.
    pub jitter: bool,
}

impl RetryPolicy {
    /// The executor-preparation policy: three attempts with a fixed delay.
    #[must_use]
    pub fn prepare(interval: Duration) -> Self {
        Self {
            max_attempts: PREPARE_ATTEMPTS,
            interval,
            jitter: false,
        }
    }

    /// A stage policy: `attempts` tries, no delay.
    #[must_use]
    pub fn stage(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            interval: Duration::ZERO,
            jitter: false,
        }
    }

    /// Overrides the attempt count.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Enables delay jitter.
    #[must_use]
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    fn delay(&self) -> Duration {
        if !self.jitter || self.interval.is_zero() {
            return self.interval;
        }
        let max = self.interval.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}

/// Runs `operation` under `policy`.
///
/// The inter-attempt delay races the token, so cancellation never waits for
/// a sleeping retry loop. The returned error is the last attempt's.
pub async fn run_with_retry<T, F, Fut, R>(
    policy: &RetryPolicy,
    token: &CancelToken,
    mut operation: F,
    retryable: R,
) -> Result<T, RunnerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RunnerError>>,
    R: Fn(&RunnerError) -> bool,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_attempts || !retryable(&err) || token.is_cancelled() {
                    return Err(err);
                }
                debug!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "retrying after error"
                );
                let delay = policy.delay();
                if !delay.is_zero() {
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => return Err(err),
                    }
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::cancellation::CancellationCause;

    fn counting_op(
        counter: Arc<AtomicUsize>,
        failures: usize,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = Result<u32, RunnerError>> + Send>>
    {
        move || {
            let counter = counter.clone();
            Box::pin(async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= failures {
                    Err(RunnerError::transient(format!("attempt {n}")))
                } else {
                    Ok(42)
                }
            })
        }
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = run_with_retry(
            &RetryPolicy::stage(3),
            &CancelToken::new(),
            counting_op(calls.clone(), 0),
            RunnerError::is_retryable,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = run_with_retry(
            &RetryPolicy::stage(3),
            &CancelToken::new(),
            counting_op(calls.clone(), 2),
            RunnerError::is_retryable,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result: Result<u32, RunnerError> = run_with_retry(
            &RetryPolicy::stage(3),
            &CancelToken::new(),
            counting_op(calls.clone(), 10),
            RunnerError::is_retryable,
        )
        .await;

        assert_eq!(result.unwrap_err().to_string(), "attempt 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<u32, RunnerError> = run_with_retry(
            &RetryPolicy::stage(5),
            &CancelToken::new(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(RunnerError::system("hard failure"))
                }
            },
            RunnerError::is_retryable,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_retrying() {
        let token = CancelToken::new();
        token.cancel(CancellationCause::user_cancel());

        let calls = Arc::new(AtomicUsize::new(0));
        let result: Result<u32, RunnerError> = run_with_retry(
            &RetryPolicy::stage(5),
            &token,
            counting_op(calls.clone(), 10),
            RunnerError::is_retryable,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prepare_policy_attempts() {
        let policy = RetryPolicy::prepare(Duration::ZERO);
        assert_eq!(policy.max_attempts, PREPARE_ATTEMPTS);

        let calls = Arc::new(AtomicUsize::new(0));
        let result: Result<u32, RunnerError> = run_with_retry(
            &policy,
            &CancelToken::new(),
            counting_op(calls.clone(), 10),
            RunnerError::is_retryable,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_jitter_stays_within_interval() {
        let policy = RetryPolicy::prepare(Duration::from_millis(100)).with_jitter();
        for _ in 0..10 {
            assert!(policy.delay() <= Duration::from_millis(100));
        }
    }
}
