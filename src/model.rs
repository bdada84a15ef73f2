//! Types for test cases and run results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::assertion::AssertionPlan;
use crate::codec::{ActResult, ActionRecord};

/// A natural-language browser test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// Unique case identifier (also the store file name)
    pub id: String,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    /// Page the case starts on
    pub url: String,

    /// Ordered natural-language steps
    #[serde(default)]
    pub steps: Vec<String>,

    /// Expected outcome, verified after all steps pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_result: Option<String>,

    /// API URLs whose request bodies are recorded
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_urls: Vec<String>,

    /// Subset of recorded API URLs validated on each run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validate_api_urls: Vec<String>,
}

impl TestCase {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn step(mut self, step: impl Into<String>) -> Self {
        self.steps.push(step.into());
        self
    }

    pub fn expect(mut self, expected: impl Into<String>) -> Self {
        self.expected_result = Some(expected.into());
        self
    }
}

/// Which path executed a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPath {
    /// Cached actions replayed by selector
    Replay,
    /// Actions discovered by the planner
    Plan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Passed,
    Failed,
}

/// Outcome of one executed step
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    /// Index into [`TestCase::steps`]
    pub index: usize,
    pub description: String,
    pub status: StepStatus,
    pub error: Option<String>,
    pub message: String,
    /// Actions that were executed (or captured) for this step
    pub actions: Vec<ActionRecord>,
    pub path: Option<StepPath>,
    pub page_load_wait_attempted: bool,
    pub page_load_wait_timed_out: bool,
}

impl StepResult {
    pub fn pending(index: usize, description: impl Into<String>) -> Self {
        Self {
            index,
            description: description.into(),
            status: StepStatus::Pending,
            error: None,
            message: String::new(),
            actions: Vec::new(),
            path: None,
            page_load_wait_attempted: false,
            page_load_wait_timed_out: false,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == StepStatus::Passed
    }

    /// Convert into the persisted wire format
    pub fn to_act_result(&self) -> ActResult {
        ActResult {
            success: self.passed(),
            message: self
                .error
                .clone()
                .unwrap_or_else(|| self.message.clone()),
            action_description: self.description.clone(),
            actions: self.actions.clone(),
            page_load_wait_attempted: Some(self.page_load_wait_attempted),
            page_load_wait_timed_out: Some(self.page_load_wait_timed_out),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Pending,
    Passed,
    Failed,
}

/// Result of one case execution
#[derive(Debug, Clone)]
pub struct TestResult {
    pub id: String,
    pub status: CaseStatus,
    /// One entry per executed step, in step order
    pub steps: Vec<StepResult>,
    /// Assertion log (passed) or failure summary (failed)
    pub actual_result: String,
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    /// Plan that verified successfully in this run
    pub assertion_plan: Option<AssertionPlan>,
    /// Whether verification ran; a stored plan is only replaced when it did
    pub assertions_ran: bool,
    pub trace_path: Option<PathBuf>,
    /// Full execution log, kept only for failed cases
    pub log: Option<String>,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        self.status == CaseStatus::Passed
    }

    /// Steps that took the given path in this run
    pub fn count_path(&self, path: StepPath) -> usize {
        self.steps.iter().filter(|s| s.path == Some(path)).count()
    }
}

/// Ordered, timestamped execution log for a single case
#[derive(Debug, Clone, Default)]
pub struct CaseLog {
    case_id: String,
    lines: Vec<String>,
}

impl CaseLog {
    pub fn new(case_id: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            lines: Vec::new(),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!(case = %self.case_id, "{}", line);
        self.lines
            .push(format!("[{}] {}", Utc::now().format("%H:%M:%S%.3f"), line));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_builder_and_wire_names() {
        let case = TestCase::new("TC-1", "https://x/login")
            .step("click login")
            .expect("redirect to /dashboard");
        let value = serde_json::to_value(&case).unwrap();
        assert_eq!(value["expectedResult"], "redirect to /dashboard");
        assert_eq!(value["name"], "TC-1");
        assert!(value.get("apiUrls").is_none());
    }

    #[test]
    fn test_step_result_to_act_result_prefers_error() {
        let mut step = StepResult::pending(0, "click login");
        step.status = StepStatus::Failed;
        step.message = "attempted".to_string();
        step.error = Some("selector #go not found".to_string());
        let act = step.to_act_result();
        assert!(!act.success);
        assert_eq!(act.message, "selector #go not found");
        assert_eq!(act.page_load_wait_attempted, Some(false));
    }

    #[test]
    fn test_case_log_keeps_order() {
        let mut log = CaseLog::new("TC-1");
        log.push("first");
        log.push("second");
        assert_eq!(log.lines().len(), 2);
        assert!(log.render().find("first").unwrap() < log.render().find("second").unwrap());
    }
}
