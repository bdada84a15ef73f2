// Core types shared by browser drivers and planners

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Result type for browser driver operations
pub type DriverResult<T> = Result<T, DriverError>;

/// Error types for browser driver operations
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("selector not found: {0}")]
    SelectorNotFound(String),

    #[error("timed out after {timeout:?}: {operation}")]
    Timeout { operation: String, timeout: Duration },

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("browser session is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DriverError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout { .. })
    }
}

/// How long navigation waits before it is considered done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitPolicy {
    /// Wait for the load event
    Load,
    /// Wait for DOMContentLoaded
    DomContentLoaded,
    /// Return as soon as the response is committed
    Commit,
}

impl WaitPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitPolicy::Load => "load",
            WaitPolicy::DomContentLoaded => "domcontentloaded",
            WaitPolicy::Commit => "commit",
        }
    }

    /// The next looser policy, used for the single navigation retry
    pub fn looser(&self) -> Option<WaitPolicy> {
        match self {
            WaitPolicy::Load => Some(WaitPolicy::Commit),
            WaitPolicy::DomContentLoaded => Some(WaitPolicy::Commit),
            WaitPolicy::Commit => None,
        }
    }
}

/// Outcome of a network-quiescence wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    Idle,
    TimedOut,
}

/// What a planner sees of the page
#[derive(Debug, Clone, Default)]
pub struct PageState {
    pub url: String,
    pub title: String,
    /// Text outline of interactive elements with their selectors
    pub outline: String,
    /// Optional PNG screenshot
    pub screenshot: Option<Vec<u8>>,
}

/// One element matched by an observation query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedMatch {
    pub selector: String,
    #[serde(default)]
    pub description: String,
}

/// A request observed on the page, used for API recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedRequest {
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub body: Option<Value>,
}

/// Typed planner failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlannerError {
    #[error("planner returned no candidates")]
    NoCandidates,

    #[error("planner output malformed: {0}")]
    Malformed(String),

    #[error("planner unavailable after {attempts} attempt(s): {reason}")]
    Unavailable { attempts: usize, reason: String },

    #[error("planner rejected credentials (HTTP {status}). {hint}")]
    Auth { status: u16, hint: String },
}

impl PlannerError {
    /// Auth failures are surfaced distinctly and never degrade to a fallback
    pub fn is_auth(&self) -> bool {
        matches!(self, PlannerError::Auth { .. })
    }
}

/// Result of a schema validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub ok: bool,
    pub reason: Option<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}
