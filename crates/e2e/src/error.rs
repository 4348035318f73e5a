//! Error types for the E2E harness

use taskdeck_common::{EntityKind, UnknownEntityKind};
use thiserror::Error;

/// Raised by a circuit breaker that rejected a call without attempting it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{name}: Circuit breaker is OPEN")]
pub struct CircuitOpenError {
    pub name: String,
}

#[derive(Error, Debug)]
pub enum E2eError {
    /// No response was received (DNS, refused connection, transport timeout).
    #[error("Network error: {0}")]
    Network(String),

    /// A well-formed response with a non-2xx status.
    #[error("API request failed: {method} {endpoint} - {status} {status_text}. {body}")]
    ApiRequest {
        method: String,
        endpoint: String,
        status: u16,
        status_text: String,
        body: serde_json::Value,
    },

    #[error("{kind} lookup failed: nothing matches '{key}'")]
    NotFound { kind: EntityKind, key: String },

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Scenario parse error: {0}")]
    ScenarioParse(String),

    #[error("Step failed: {step} - {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    UnknownEntityKind(#[from] UnknownEntityKind),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl E2eError {
    /// HTTP status of an `ApiRequest` failure
    pub fn status(&self) -> Option<u16> {
        match self {
            E2eError::ApiRequest { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Failures worth another attempt: transport errors, timeouts,
    /// throttling and server-side errors. Validation errors and lookups
    /// are not.
    pub fn is_transient(&self) -> bool {
        match self {
            E2eError::Network(_) | E2eError::Timeout(_) => true,
            E2eError::ApiRequest { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
