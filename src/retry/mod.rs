// src/retry/mod.rs
// Uniform retry-with-backoff used by tool dispatch and external HTTP calls

pub mod reconnect;

pub use reconnect::{
    ConnectionState, ConnectionStatus, Reconnectable, ReconnectionManager, ReconnectionOptions,
};

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::error::{DriftError, Result};

/// Backoff policy for `with_retry`
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Maximum number of attempts (the first attempt counts)
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Multiply each delay by a random factor in [0.5, 1.5]
    pub jitter: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryOptions {
    /// Delay before the retry that follows `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let base = self.initial_delay.as_millis() as f64 * exp;
        let capped = base.min(self.max_delay.as_millis() as f64);
        let jittered = if self.jitter {
            capped * rand::rng().random_range(0.5..=1.5)
        } else {
            capped
        };
        Duration::from_millis(jittered as u64)
    }
}

/// Outcome of a retried operation
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<DriftError>,
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    /// Collapse into a `Result`, surfacing the last error
    pub fn into_result(self) -> Result<T> {
        match self.data {
            Some(data) => Ok(data),
            None => Err(self
                .error
                .unwrap_or_else(|| DriftError::internal("retry produced neither data nor error"))),
        }
    }
}

/// Run `op` up to `max_retries` times with exponential backoff between
/// attempts. The closure receives the 1-based attempt number.
pub async fn with_retry<T, F, Fut>(mut op: F, opts: &RetryOptions) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_notify(&mut op, opts, |_, _, _| {}).await
}

/// `with_retry` with an `on_retry(attempt, delay, error)` hook invoked
/// before each backoff sleep.
pub async fn with_retry_notify<T, F, Fut, N>(
    op: &mut F,
    opts: &RetryOptions,
    mut on_retry: N,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
    N: FnMut(u32, Duration, &DriftError),
{
    let max_attempts = opts.max_retries.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match op(attempt).await {
            Ok(data) => {
                return RetryOutcome {
                    success: true,
                    data: Some(data),
                    error: None,
                    attempts: attempt,
                };
            }
            Err(err) => {
                if attempt < max_attempts {
                    let delay = opts.delay_for_attempt(attempt);
                    on_retry(attempt, delay, &err);
                    last_error = Some(err);
                    tokio::time::sleep(delay).await;
                } else {
                    last_error = Some(err);
                }
            }
        }
    }

    RetryOutcome {
        success: false,
        data: None,
        error: last_error,
        attempts: max_attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_opts(max_retries: u32) -> RetryOptions {
        RetryOptions {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let outcome = with_retry(|_| async { Ok::<_, DriftError>(42) }, &fast_opts(3)).await;
        assert!(outcome.success);
        assert_eq!(outcome.data, Some(42));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_recovers_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let outcome = with_retry(
            move |_| {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(DriftError::network("refused"))
                    } else {
                        Ok("up")
                    }
                }
            },
            &fast_opts(5),
        )
        .await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_and_keeps_last_error() {
        let outcome: RetryOutcome<()> =
            with_retry(|_| async { Err(DriftError::timeout("slow")) }, &fast_opts(3)).await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 3);
        let err = outcome.error.unwrap();
        assert_eq!(err.kind, crate::error::ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_on_retry_hook_sees_each_failure() {
        let mut observed = Vec::new();
        let mut op = |_| async { Err::<(), _>(DriftError::network("down")) };

        let outcome = with_retry_notify(&mut op, &fast_opts(3), |attempt, delay, _| {
            observed.push((attempt, delay));
        })
        .await;

        assert!(!outcome.success);
        // No hook call after the final attempt
        assert_eq!(observed.len(), 2);
        assert_eq!(observed[0].0, 1);
        assert_eq!(observed[1].0, 2);
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let opts = RetryOptions {
            max_retries: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            backoff_factor: 2.0,
            jitter: false,
        };

        assert_eq!(opts.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(opts.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(opts.delay_for_attempt(3), Duration::from_millis(400));
        // Capped at max_delay
        assert_eq!(opts.delay_for_attempt(8), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let opts = RetryOptions {
            max_retries: 1,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(10_000),
            backoff_factor: 1.0,
            jitter: true,
        };

        for _ in 0..50 {
            let delay = opts.delay_for_attempt(1).as_millis();
            assert!((50..=150).contains(&delay), "delay {delay} out of band");
        }
    }
}
