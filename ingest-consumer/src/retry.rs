use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use metrics::counter;
use tracing::warn;

pub const RETRIES_TOTAL: &str = "consumer_retries_total";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// How often, and how patiently, a failing cache or scheduler call is retried
/// before the error is handed back to the consumer loop.
pub struct RetryPolicy {
    /// Total number of tries, including the first one. One means no retries.
    max_attempts: u32,
    /// Coefficient to multiply initial_interval with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    initial_interval: Duration,
    /// The maximum possible backoff between retries.
    maximum_interval: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        backoff_coefficient: u32,
        initial_interval: Duration,
        maximum_interval: Option<Duration>,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_coefficient,
            initial_interval,
            maximum_interval,
        }
    }

    /// Fail on the first error, leaving recovery to redelivery.
    pub fn no_retries() -> Self {
        Self::new(1, 1, Duration::ZERO, None)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before retrying after `attempt` failed tries (zero-based).
    pub fn time_until_next_retry(&self, attempt: u32) -> Duration {
        let candidate_interval = self
            .initial_interval
            .saturating_mul(self.backoff_coefficient.saturating_pow(attempt));

        match self.maximum_interval {
            Some(max_interval) => std::cmp::min(candidate_interval, max_interval),
            None => candidate_interval,
        }
    }

    /// Run `op` until it succeeds or the attempts are used up, returning the
    /// last error in the latter case.
    pub async fn run<T, E, F, Fut>(&self, operation: &'static str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run_when(operation, |_| true, op).await
    }

    /// Like `run`, but errors for which `retryable` is false are returned
    /// straight away.
    pub async fn run_when<T, E, F, Fut, R>(
        &self,
        operation: &'static str,
        retryable: R,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < self.max_attempts && retryable(&err) => {
                    let backoff = self.time_until_next_retry(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying after error: {}",
                        err
                    );
                    counter!(RETRIES_TOTAL, "operation" => operation).increment(1);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            3,
            2,
            Duration::from_millis(100),
            Some(Duration::from_secs(2)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, 2, Duration::from_millis(1), Some(Duration::from_millis(5)))
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.time_until_next_retry(0), Duration::from_millis(100));
        assert_eq!(policy.time_until_next_retry(1), Duration::from_millis(200));
        assert_eq!(policy.time_until_next_retry(3), Duration::from_millis(800));
        assert_eq!(policy.time_until_next_retry(10), Duration::from_secs(2));
        assert_eq!(policy.time_until_next_retry(40), Duration::from_secs(2));
    }

    #[test]
    fn at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, 2, Duration::ZERO, None).max_attempts(), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = fast_policy()
            .run("test", || async {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err("down".to_string()),
                    n => Ok(n),
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = fast_policy()
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            })
            .await;

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = fast_policy()
            .run_when(
                "test",
                |err: &String| err != "permanent",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("permanent".to_string())
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_retries_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = RetryPolicy::no_retries()
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
