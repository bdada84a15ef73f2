//! Collaborator abstractions.
//!
//! The engine only talks to the browser, the AI planner and the schema
//! validator through these traits:
//! - `BrowserDriver` for one isolated browser session (`PlaywrightDriver`, `MockBrowser`)
//! - `BrowserFactory` to construct a fresh session per test case
//! - `ActionPlanner` for action planning, opaque execution and observation (`ChatPlanner`, `MockPlanner`)
//! - `SchemaValidator` for API body shapes (`ShapeValidator`)

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::types::{
    CapturedRequest, DriverResult, ObservedMatch, PageState, PlannerError, SettleOutcome,
    Validation, WaitPolicy,
};

/// Low-level, selector-addressed browser session
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Navigate to a URL, waiting according to `policy`
    async fn navigate(&self, url: &str, policy: WaitPolicy, timeout: Duration) -> DriverResult<()>;

    /// Whether the selector currently resolves to at least one element
    async fn exists(&self, selector: &str) -> DriverResult<bool>;

    async fn click(&self, selector: &str) -> DriverResult<()>;

    async fn fill(&self, selector: &str, value: &str) -> DriverResult<()>;

    async fn type_text(&self, selector: &str, text: &str) -> DriverResult<()>;

    async fn select_option(&self, selector: &str, value: &str) -> DriverResult<()>;

    async fn set_checked(&self, selector: &str, checked: bool) -> DriverResult<()>;

    async fn hover(&self, selector: &str) -> DriverResult<()>;

    async fn press(&self, selector: &str, key: &str) -> DriverResult<()>;

    async fn current_url(&self) -> DriverResult<String>;

    async fn title(&self) -> DriverResult<String>;

    /// Visible text of the page body
    async fn page_text(&self) -> DriverResult<String>;

    /// Snapshot handed to the planner
    async fn page_state(&self) -> DriverResult<PageState>;

    /// Wait for network quiescence, bounded by `timeout`
    async fn wait_for_network_idle(&self, timeout: Duration) -> DriverResult<SettleOutcome>;

    /// Evaluate a script in the page and return its JSON result
    async fn evaluate(&self, script: &str) -> DriverResult<Value>;

    async fn start_trace(&self, path: &Path) -> DriverResult<()>;

    /// Stop tracing and return the artifact path, if one was written
    async fn stop_trace(&self) -> DriverResult<Option<PathBuf>>;

    /// Requests observed since the last call
    async fn drain_requests(&self) -> DriverResult<Vec<CapturedRequest>>;

    async fn close(&self) -> DriverResult<()>;
}

/// Constructs an independent browser session for each case
#[async_trait]
pub trait BrowserFactory: Send + Sync {
    async fn launch(&self, case_id: &str) -> DriverResult<Arc<dyn BrowserDriver>>;
}

/// AI action-planning and observation capability
#[async_trait]
pub trait ActionPlanner: Send + Sync {
    /// Request action candidates for an instruction. The raw value is
    /// normalized by [`crate::codec::normalize_planner_output`].
    async fn plan(&self, instruction: &str, page: &PageState) -> Result<Value, PlannerError>;

    /// Opaque natural-language execution: the capability performs the
    /// instruction itself and reports what happened.
    async fn act(
        &self,
        instruction: &str,
        page: &PageState,
        driver: &dyn BrowserDriver,
    ) -> Result<Value, PlannerError>;

    /// Find elements matching a natural-language query
    async fn observe(&self, query: &str, page: &PageState)
        -> Result<Vec<ObservedMatch>, PlannerError>;

    /// Produce an assertion plan for an expected result. Returns the raw
    /// model text; parsing and validation happen in [`crate::assertion`].
    async fn plan_assertions(&self, prompt: &str, page: &PageState) -> Result<String, PlannerError>;
}

/// Derives and checks request body shapes
pub trait SchemaValidator: Send + Sync {
    fn derive(&self, sample: &Value) -> Value;

    fn validate(&self, schema: &Value, body: &Value) -> Validation;
}
