//! Harness configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::breaker::CircuitBreakerConfig;
use crate::error::E2eResult;
use crate::playwright::{Browser, PlaywrightConfig};
use crate::retry::RetryPolicy;

/// Default application root when `BASE_URL` is not set
pub const DEFAULT_BASE_URL: &str = "http://localhost:5173";

/// Harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Application root, used for navigation and to derive the API base
    pub base_url: String,

    /// Upper bound for a single API request
    pub request_timeout_ms: u64,

    /// Retry policy for network-sensitive steps
    pub retry: RetrySettings,

    /// Defaults for named circuit breakers
    pub breaker: BreakerSettings,

    /// Login used by global setup, if any
    pub credentials: Option<Credentials>,

    /// Browser configuration
    pub browser: BrowserSettings,

    /// Directory holding YAML scenarios
    pub scenarios_dir: PathBuf,

    /// Output directory for results
    pub output_dir: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_ms: 10_000,
            retry: RetrySettings::default(),
            breaker: BreakerSettings::default(),
            credentials: None,
            browser: BrowserSettings::default(),
            scenarios_dir: PathBuf::from("tests/e2e/scenarios"),
            output_dir: PathBuf::from("test-results"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_ms: 1000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.delay_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Upper bound for one browser step, including browser launch
    pub step_timeout_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            step_timeout_ms: 30_000,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Overlay `BASE_URL`, `E2E_USERNAME` and `E2E_PASSWORD` from the process environment
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay environment values from an arbitrary lookup
    pub fn apply_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.base_url = url;
        }

        match (lookup("E2E_USERNAME"), lookup("E2E_PASSWORD")) {
            (Some(username), Some(password)) => {
                self.credentials = Some(Credentials { username, password });
            }
            (Some(_), None) | (None, Some(_)) => {
                tracing::warn!("E2E_USERNAME and E2E_PASSWORD must be set together; ignoring");
            }
            (None, None) => {}
        }

        self
    }

    /// Application root without a trailing slash
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// REST API root: `{base_url}/api`
    pub fn api_base(&self) -> String {
        format!("{}/api", self.base_url())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.policy()
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(
            self.breaker.failure_threshold,
            Duration::from_millis(self.breaker.reset_timeout_ms),
        )
    }

    /// Playwright settings derived from the browser section
    pub fn playwright(&self) -> PlaywrightConfig {
        PlaywrightConfig {
            base_url: self.base_url().to_string(),
            viewport_width: self.browser.viewport_width,
            viewport_height: self.browser.viewport_height,
            browser: self.browser.browser,
            headless: self.browser.headless,
            step_timeout: Duration::from_millis(self.browser.step_timeout_ms),
        }
    }
}
