// Page-side capture event shapes and capture errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Capture failures. None of these are fatal to a case; capture degrades to
/// polling-only and the host keeps going.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("listener injection blocked: {0}")]
    Injection(String),

    #[error("capture drain failed: {0}")]
    Drain(String),

    #[error("malformed capture payload: {0}")]
    Malformed(String),
}

/// Kind of DOM event reported by the page listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawEventKind {
    Click,
    Input,
    Change,
    Blur,
}

/// One step of the element's path from the document root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    pub tag: String,
    /// 1-based position among same-tag siblings
    pub index: usize,
}

/// Structural description of the event target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawElement {
    pub tag: String,
    #[serde(default)]
    pub id: Option<String>,
    /// Whether `#id` matched exactly one element when the event fired
    #[serde(default)]
    pub id_unique: bool,
    /// Root-first path
    #[serde(default)]
    pub path: Vec<PathSegment>,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub input_type: String,
}

impl RawElement {
    pub fn is_toggle(&self) -> bool {
        self.tag == "input" && matches!(self.input_type.as_str(), "checkbox" | "radio")
    }

    pub fn is_select(&self) -> bool {
        self.tag == "select"
    }

    pub fn is_text_entry(&self) -> bool {
        self.tag == "textarea" || (self.tag == "input" && !self.is_toggle())
    }
}

/// An interaction recorded by the page listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCaptureEvent {
    #[serde(rename = "type")]
    pub kind: RawEventKind,
    /// Page clock, milliseconds
    pub ts: f64,
    pub element: RawElement,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub checked: Option<bool>,
}

/// Payload returned by one execution of the drain script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DrainResponse {
    /// False when the listener had to be (re)installed by this drain
    #[serde(default)]
    pub installed: bool,
    /// Events dropped page-side because the queue was full
    #[serde(default)]
    pub dropped: u64,
    /// Page clock at drain time
    #[serde(default)]
    pub now: f64,
    #[serde(default)]
    pub events: Vec<RawCaptureEvent>,
}
