//! Assertion planning.
//!
//! The model is asked for a JSON plan where URL expectations are explicit
//! `url` items, since the observation capability cannot see the address bar.
//! Replies are tolerated inside code fences or surrounding prose, and
//! observation items that are really URL checks are rewritten as such.

use serde_json::Value;

use super::types::{AssertionError, AssertionPlan, AssertionPlanItem, AssertionResult};
use crate::driver::{ActionPlanner, PageState};

/// Build the assertion-planning prompt for an expected result
pub fn build_prompt(expected: &str) -> String {
    format!(
        "You verify the outcome of a browser test.\n\
         Expected result: \"{}\"\n\n\
         Reply with JSON only, in this shape:\n\
         {{\"summary\": \"<one sentence>\", \"assertions\": [\n  \
           {{\"kind\": \"url\", \"value\": \"<substring the current URL must contain>\"}},\n  \
           {{\"kind\": \"observation\", \"text\": \"<element or text that must be visible>\"}}\n]}}\n\n\
         Rules:\n\
         - Any expectation about the URL, path, redirect or route MUST be a \"url\" item.\n\
         - Observation items describe visible page content only; they cannot see the URL.\n\
         - Keep the list short and ordered by importance.",
        expected
    )
}

/// Cut the JSON object out of a model reply
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse, normalize and validate a plan from raw model text
pub fn parse_plan(text: &str) -> AssertionResult<AssertionPlan> {
    let json = extract_json(text)
        .ok_or_else(|| AssertionError::Malformed("no JSON object in reply".to_string()))?;
    let value: Value =
        serde_json::from_str(json).map_err(|e| AssertionError::Malformed(e.to_string()))?;
    let mut plan: AssertionPlan = serde_json::from_value(value)
        .map_err(|e| AssertionError::Malformed(e.to_string()))?;
    let has_url_check = plan
        .assertions
        .iter()
        .any(|item| matches!(item, AssertionPlanItem::Url { .. }));
    if !has_url_check {
        plan.assertions = plan.assertions.into_iter().map(route_url_checks).collect();
    }
    plan.validate()?;
    Ok(plan)
}

/// Request a plan from the planner
pub async fn plan_assertions(
    planner: &dyn ActionPlanner,
    expected: &str,
    page: &PageState,
) -> AssertionResult<AssertionPlan> {
    let reply = planner.plan_assertions(&build_prompt(expected), page).await?;
    let mut plan = parse_plan(&reply)?;
    plan.expected_result = Some(expected.trim().to_string());
    Ok(plan)
}

/// Observation items that talk about the URL become direct URL checks.
/// Only applied when the plan has no explicit `url` item.
fn route_url_checks(item: AssertionPlanItem) -> AssertionPlanItem {
    let AssertionPlanItem::Observation { text } = &item else {
        return item;
    };
    let lower = text.to_lowercase();
    if !(lower.contains("url") || lower.contains("redirect") || lower.contains("address bar")) {
        return item;
    }
    let token = text
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| matches!(c, '\'' | '"' | '`' | ',' | '.' | ')' | '(')))
        .find(|t| t.starts_with('/') || t.starts_with("http://") || t.starts_with("https://"));
    match token {
        Some(value) => AssertionPlanItem::Url {
            value: value.to_string(),
        },
        None => item,
    }
}
