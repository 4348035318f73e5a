//! Taskdeck E2E test harness
//!
//! Keeps browser tests isolated and resilient against a shared, remote
//! Taskdeck deployment:
//! - Seeds and removes data through the REST API instead of the UI
//! - Tracks every entity a test creates and deletes it afterwards, in
//!   dependency order, whether the test passed or not
//! - Retries flaky operations and gates them behind circuit breakers
//! - Drives Playwright from declarative YAML scenarios
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ScenarioRunner                          │
//! │    ├── IsolatedContext (per scenario)                       │
//! │    │     ├── EntityRegistry                                 │
//! │    │     ├── factories: users / statuses / labels / tasks   │
//! │    │     └── cleanup() -> CleanupReport                     │
//! │    ├── retry_if + CircuitBreaker ("browser") per step       │
//! │    └── PageController (PlaywrightPage)                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ApiClient (ResourceApi)  ──►  {BASE_URL}/api               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod breaker;
pub mod cleanup;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod factories;
pub mod playwright;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod scenario;
pub mod testing;
pub mod unique;

pub use breaker::{BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use cleanup::{cleanup_registered_entities, CleanupFailure, CleanupReport};
pub use client::{ApiClient, ResourceApi};
pub use config::HarnessConfig;
pub use context::{with_auto_cleanup, IsolatedContext};
pub use error::{CircuitOpenError, E2eError, E2eResult};
pub use playwright::{PageController, PlaywrightPage};
pub use registry::EntityRegistry;
pub use retry::{retry, retry_if, with_graceful_degradation, with_timeout, RetryPolicy};
pub use runner::{ScenarioRunner, SuiteResult};
pub use scenario::{Scenario, Step};

/// Install a compact subscriber for tests; repeated calls are no-ops.
/// Honors `RUST_LOG`.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
