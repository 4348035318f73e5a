//! Bounded retry with linear backoff, plus timeout and fallback helpers
//!
//! Used to make network-sensitive browser steps and API calls deterministic
//! enough for assertions. Delays grow linearly (`delay * attempt`), which
//! keeps the worst case for a test step predictable.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `delay * n` before the next try
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// A single attempt, no waiting
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Attempts actually made; zero is treated as one
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Wait after a failed `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.delay.saturating_mul(attempt)
    }
}

/// Run `op` until it succeeds or the policy is exhausted.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_if(policy, op, |_| true).await
}

/// Run `op` until it succeeds, the policy is exhausted, or `should_retry`
/// declines the error. The last error is returned unchanged.
pub async fn retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    mut op: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("Operation succeeded on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt >= attempts {
                    if attempts > 1 {
                        warn!("Operation failed after {} attempts: {}", attempts, e);
                    }
                    return Err(e);
                }
                if !should_retry(&e) {
                    debug!("Not retrying after attempt {}: {}", attempt, e);
                    return Err(e);
                }

                let backoff = policy.backoff_for(attempt);
                warn!(
                    error = %e,
                    "Operation failed on attempt {}/{}, retrying in {:?}",
                    attempt, attempts, backoff
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

/// Bound a wait. Expiry surfaces as `E2eError::Timeout` naming `what`.
pub async fn with_timeout<T, Fut>(duration: Duration, what: &str, fut: Fut) -> E2eResult<T>
where
    Fut: Future<Output = E2eResult<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(E2eError::Timeout(format!("{} after {:?}", what, duration))),
    }
}

/// Run `op`; on failure log a warning and return `fallback` instead.
pub async fn with_graceful_degradation<T, E, Fut>(fut: Fut, fallback: T) -> T
where
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    match fut.await {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Operation failed, using fallback value");
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;
    use tokio::time::Instant;

    #[test_case(0, 3 ; "first try")]
    #[test_case(2, 3 ; "last try succeeds")]
    #[test_case(3, 3 ; "exhausted")]
    #[test_case(5, 3 ; "more failures than attempts")]
    #[test_case(1, 1 ; "single attempt fails")]
    #[test_case(0, 1 ; "single attempt succeeds")]
    #[tokio::test(start_paused = true)]
    async fn test_succeeds_iff_failures_below_attempts(failures: u32, max_retries: u32) {
        let policy = RetryPolicy::new(max_retries, Duration::from_millis(100));
        let mut calls = 0;

        let result = retry(&policy, || {
            let outcome = if calls < failures {
                Err(E2eError::Network("refused".into()))
            } else {
                Ok(calls + 1)
            };
            calls += 1;
            async move { outcome }
        })
        .await;

        assert_eq!(result.is_ok(), failures < max_retries);
        assert_eq!(calls, (failures + 1).min(max_retries));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_linear() {
        let policy = RetryPolicy::new(4, Duration::from_millis(1000));
        let start = Instant::now();
        let mut calls = 0;

        let result: E2eResult<()> = retry(&policy, || {
            calls += 1;
            async { Err(E2eError::Timeout("element".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 4);
        // 1s + 2s + 3s between the four attempts, none after the last
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(6000), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(6100), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_never_sleeps() {
        let policy = RetryPolicy::new(1, Duration::from_secs(30));
        let start = Instant::now();

        let result: Result<(), String> = retry(&policy, || async { Err("boom".to_string()) }).await;

        assert_eq!(result.unwrap_err(), "boom");
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_declining_stops_after_one_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let mut calls = 0;

        let result: E2eResult<()> = retry_if(
            &policy,
            || {
                calls += 1;
                async { Err(E2eError::Network("down".into())) }
            },
            |_| false,
        )
        .await;

        assert!(matches!(result, Err(E2eError::Network(_))));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_selective_retry_on_transient_errors_only() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let mut calls = 0;

        let result: E2eResult<()> = retry_if(
            &policy,
            || {
                calls += 1;
                let err = if calls == 1 {
                    E2eError::Network("reset".into())
                } else {
                    E2eError::ApiRequest {
                        method: "POST".into(),
                        endpoint: "/users".into(),
                        status: 422,
                        status_text: "Unprocessable Entity".into(),
                        body: serde_json::Value::Null,
                    }
                };
                async move { Err(err) }
            },
            E2eError::is_transient,
        )
        .await;

        assert_eq!(result.unwrap_err().status(), Some(422));
        assert_eq!(calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_error_is_returned() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let mut calls = 0;

        let result: E2eResult<()> = retry(&policy, || {
            calls += 1;
            let err = E2eError::Network(format!("attempt {} refused", calls));
            async move { Err(err) }
        })
        .await;

        assert_eq!(result.unwrap_err().to_string(), "Network error: attempt 3 refused");
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts(), 1);
        assert_eq!(RetryPolicy::once().attempts(), 1);
        assert_eq!(
            RetryPolicy::default().backoff_for(3),
            Duration::from_millis(3000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_maps_expiry() {
        let result: E2eResult<()> = with_timeout(Duration::from_millis(50), "task row", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(E2eError::Timeout(what)) => assert!(what.starts_with("task row")),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_graceful_degradation() {
        let value = with_graceful_degradation(async { Err::<u32, _>("gone") }, 7).await;
        assert_eq!(value, 7);

        let value = with_graceful_degradation(async { Ok::<_, String>(1) }, 7).await;
        assert_eq!(value, 1);
    }
}
