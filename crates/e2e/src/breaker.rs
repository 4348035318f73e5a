//! Circuit breaker for flaky external dependencies
//!
//! ```text
//! CLOSED ──[failure_threshold failures]──> OPEN
//!   ▲                                        │
//!   │                                        │ [reset_timeout elapsed, checked on next call]
//!   │                                        ▼
//!   └────────────[success]─────────────── HALF_OPEN
//!                 [failure] ─────────────> OPEN
//! ```
//!
//! The breaker only gates invocation. Errors from the wrapped operation are
//! always handed back to the caller after bookkeeping.
//!
//! Breakers are looked up by logical resource name through a
//! [`BreakerRegistry`] owned by whoever bootstraps the test process.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::error::CircuitOpenError;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through, failures are counted
    Closed,
    /// Calls are rejected without invoking the operation
    Open,
    /// One trial call is admitted to probe for recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures that trip the breaker; at least 1
    pub failure_threshold: u32,
    /// Cooldown after the last failure before a probe is allowed
    pub reset_timeout: Duration,
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(60_000))
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// Per-resource circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// State as last recorded. An OPEN breaker whose cooldown has elapsed
    /// still reports OPEN until the next `execute`.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    pub fn last_failure(&self) -> Option<Instant> {
        self.inner.lock().last_failure
    }

    /// Run `op` through the breaker.
    ///
    /// Rejects with [`CircuitOpenError`] (converted into the caller's error
    /// type) when OPEN and still cooling down, or when HALF_OPEN and the
    /// single probe is already running.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        let _probe = self.admit()?;

        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }

    /// Force CLOSED with a clean history
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
        info!("{}: Circuit breaker reset", self.name);
    }

    fn admit(&self) -> Result<ProbeGuard<'_>, CircuitOpenError> {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Ok(ProbeGuard { inner: None }),
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .map(|at| at.elapsed() > self.config.reset_timeout)
                    .unwrap_or(true);

                if !cooled_down {
                    return Err(self.open_error());
                }

                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = true;
                info!("{}: Circuit breaker transitioning to HALF_OPEN", self.name);
                Ok(ProbeGuard { inner: Some(&self.inner) })
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    debug!("{}: probe already running, rejecting call", self.name);
                    return Err(self.open_error());
                }
                inner.probe_in_flight = true;
                Ok(ProbeGuard { inner: Some(&self.inner) })
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            info!("{}: Circuit breaker closed after successful call", self.name);
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        if inner.failure_count >= self.config.failure_threshold {
            if inner.state != CircuitState::Open {
                error!(
                    "{}: Circuit breaker opened after {} failures",
                    self.name, inner.failure_count
                );
            }
            inner.state = CircuitState::Open;
        }
    }

    fn open_error(&self) -> CircuitOpenError {
        CircuitOpenError {
            name: self.name.clone(),
        }
    }
}

/// Releases the HALF_OPEN probe slot, including when the probing future is
/// dropped before completion.
struct ProbeGuard<'a> {
    inner: Option<&'a Mutex<BreakerInner>>,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner {
            inner.lock().probe_in_flight = false;
        }
    }
}

/// Named breakers, created lazily on first lookup
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    defaults: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            defaults,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Breaker for `name`, created with the registry defaults if unseen
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_with(name, self.defaults)
    }

    /// Breaker for `name`. The first caller's config wins; a later call
    /// with a different config gets the existing instance unchanged.
    pub fn get_with(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();

        if let Some(existing) = breakers.get(name) {
            if existing.config != config {
                debug!(
                    "{}: breaker already exists, ignoring config {:?}",
                    name, config
                );
            }
            return Arc::clone(existing);
        }

        let breaker = Arc::new(CircuitBreaker::new(name, config));
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Reset every known breaker
    pub fn reset_all(&self) {
        for breaker in self.breakers.lock().values() {
            breaker.reset();
        }
    }

    /// Known breaker names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{E2eError, E2eResult};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "tasks-api",
            CircuitBreakerConfig::new(threshold, Duration::from_millis(reset_ms)),
        )
    }

    async fn fail(b: &CircuitBreaker) -> E2eResult<()> {
        b.execute(|| async { Err(E2eError::Network("refused".into())) })
            .await
    }

    async fn succeed(b: &CircuitBreaker) -> E2eResult<u32> {
        b.execute(|| async { Ok(42) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_rejects_without_invoking() {
        let b = breaker(3, 1000);

        for _ in 0..2 {
            assert!(matches!(fail(&b).await, Err(E2eError::Network(_))));
            assert_eq!(b.state(), CircuitState::Closed);
        }
        assert!(matches!(fail(&b).await, Err(E2eError::Network(_))));
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.failure_count(), 3);

        let calls = AtomicU32::new(0);
        let result: E2eResult<()> = b
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        match result {
            Err(E2eError::CircuitOpen(e)) => assert_eq!(e.name, "tasks-api"),
            other => panic!("expected CircuitOpen, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count_while_closed() {
        let b = breaker(3, 1000);

        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();
        assert_eq!(succeed(&b).await.unwrap(), 42);
        assert_eq!(b.failure_count(), 0);

        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_still_open_at_exactly_reset_timeout() {
        let b = breaker(1, 1000);
        fail(&b).await.unwrap_err();

        tokio::time::advance(Duration::from_millis(1000)).await;

        assert!(matches!(succeed(&b).await, Err(E2eError::CircuitOpen(_))));
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_success_closes() {
        let b = breaker(2, 1000);
        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1001)).await;

        assert_eq!(succeed(&b).await.unwrap(), 42);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_failure_reopens() {
        let b = breaker(2, 1000);
        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();

        tokio::time::advance(Duration::from_millis(1001)).await;

        let calls = AtomicU32::new(0);
        let result: E2eResult<()> = b
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(E2eError::Timeout("probe".into()))
            })
            .await;

        assert!(matches!(result, Err(E2eError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.failure_count() >= 2);

        // Cooldown restarts from the probe failure
        assert!(matches!(succeed(&b).await, Err(E2eError::CircuitOpen(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_probe() {
        let b = Arc::new(breaker(1, 100));
        fail(&b).await.unwrap_err();
        tokio::time::advance(Duration::from_millis(101)).await;

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let probe = tokio::spawn({
            let b = Arc::clone(&b);
            async move {
                b.execute(move || async move {
                    rx.await
                        .map_err(|_| E2eError::Network("sender dropped".into()))
                })
                .await
            }
        });
        tokio::task::yield_now().await;

        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(matches!(succeed(&b).await, Err(E2eError::CircuitOpen(_))));

        tx.send(()).unwrap();
        probe.await.unwrap().unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_releases_slot() {
        let b = breaker(1, 100);
        fail(&b).await.unwrap_err();
        tokio::time::advance(Duration::from_millis(101)).await;

        let timed_out = tokio::time::timeout(
            Duration::from_millis(10),
            b.execute(|| futures::future::pending::<E2eResult<()>>()),
        )
        .await;
        assert!(timed_out.is_err());
        assert_eq!(b.state(), CircuitState::HalfOpen);

        assert_eq!(succeed(&b).await.unwrap(), 42);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let b = breaker(1, 60_000);
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), CircuitState::Open);

        b.reset();

        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 0);
        assert!(b.last_failure().is_none());
        assert_eq!(succeed(&b).await.unwrap(), 42);
    }

    #[test]
    fn test_threshold_clamped_and_defaults() {
        assert_eq!(CircuitBreakerConfig::new(0, Duration::ZERO).failure_threshold, 1);
        let defaults = CircuitBreakerConfig::default();
        assert_eq!(defaults.failure_threshold, 5);
        assert_eq!(defaults.reset_timeout, Duration::from_secs(60));
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
    }

    #[test]
    fn test_registry_returns_same_instance_first_writer_wins() {
        let registry = BreakerRegistry::default();
        let first = registry.get_with(
            "labels-api",
            CircuitBreakerConfig::new(2, Duration::from_secs(1)),
        );
        let second = registry.get_with(
            "labels-api",
            CircuitBreakerConfig::new(9, Duration::from_secs(9)),
        );

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().failure_threshold, 2);

        let other = registry.get("users-api");
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(other.config(), CircuitBreakerConfig::default());
        assert_eq!(registry.names(), vec!["labels-api", "users-api"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_reset_all() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig::new(1, Duration::from_secs(60)));
        let a = registry.get("a");
        let b = registry.get("b");
        fail(&a).await.unwrap_err();
        fail(&b).await.unwrap_err();

        registry.reset_all();

        assert_eq!(a.state(), CircuitState::Closed);
        assert_eq!(b.state(), CircuitState::Closed);
    }
}
