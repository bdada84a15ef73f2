//! Field-level merge of a finished run into a persisted case.
//!
//! Rules:
//! - steps merge by index; the run's entry replaces history at that index,
//!   history beyond the run's last step is kept
//! - a run with no steps leaves history untouched
//! - `pageLoadWaitTimedOut` and `pageLoadWaitAttempted` are OR-ed with
//!   history per index and never reset
//! - the assertion plan is replaced only when verification ran in this run
//! - API records are unioned, newest shape wins per URL

use serde_json::Value;
use std::collections::BTreeMap;

use super::types::{PersistedCase, PersistedResult};
use crate::codec::ActResult;
use crate::model::{TestCase, TestResult};

pub fn merge_steps(prior: &[ActResult], run: &[ActResult]) -> Vec<ActResult> {
    if run.is_empty() {
        return prior.to_vec();
    }
    let len = prior.len().max(run.len());
    (0..len)
        .filter_map(|i| match (prior.get(i), run.get(i)) {
            (previous, Some(current)) => {
                let mut merged = current.clone();
                let sticky = |flag: Option<bool>, old: Option<bool>| {
                    Some(flag.unwrap_or(false) || old.unwrap_or(false))
                };
                merged.page_load_wait_attempted = sticky(
                    current.page_load_wait_attempted,
                    previous.and_then(|p| p.page_load_wait_attempted),
                );
                merged.page_load_wait_timed_out = sticky(
                    current.page_load_wait_timed_out,
                    previous.and_then(|p| p.page_load_wait_timed_out),
                );
                Some(merged)
            }
            (Some(previous), None) => Some(previous.clone()),
            (None, None) => None,
        })
        .collect()
}

pub fn merge_result(prior: Option<&PersistedResult>, run: &TestResult) -> PersistedResult {
    let mut merged = PersistedResult::from_run(run);
    let prior_steps = prior.map(|p| p.steps.as_slice()).unwrap_or_default();
    merged.steps = merge_steps(prior_steps, &merged.steps);
    if !run.assertions_ran {
        merged.assertion_plan = prior.and_then(|p| p.assertion_plan.clone());
    }
    merged
}

pub fn merge_api_records(
    prior: Option<&BTreeMap<String, Value>>,
    recorded: &BTreeMap<String, Value>,
) -> Option<BTreeMap<String, Value>> {
    let mut merged = prior.cloned().unwrap_or_default();
    merged.extend(recorded.iter().map(|(k, v)| (k.clone(), v.clone())));
    (!merged.is_empty()).then_some(merged)
}

/// Merge a run into the current document. The stored definition wins over
/// the one the run started from, in case it was edited meanwhile.
pub fn merge_case(
    current: Option<PersistedCase>,
    case: &TestCase,
    run: &TestResult,
    api_records: &BTreeMap<String, Value>,
) -> PersistedCase {
    let mut doc = current.unwrap_or_else(|| PersistedCase::new(case.clone()));
    doc.result = Some(merge_result(doc.result.as_ref(), run));
    doc.api_records = merge_api_records(doc.api_records.as_ref(), api_records);
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::{AssertionPlan, AssertionPlanItem};
    use crate::model::{CaseStatus, StepResult, StepStatus};
    use chrono::Utc;
    use serde_json::json;

    fn act(desc: &str, attempted: Option<bool>, timed_out: Option<bool>) -> ActResult {
        ActResult {
            success: true,
            action_description: desc.to_string(),
            page_load_wait_attempted: attempted,
            page_load_wait_timed_out: timed_out,
            ..Default::default()
        }
    }

    fn run(steps: Vec<StepResult>, plan: Option<AssertionPlan>, assertions_ran: bool) -> TestResult {
        TestResult {
            id: "TC-1".to_string(),
            status: CaseStatus::Passed,
            steps,
            actual_result: String::new(),
            error: None,
            start_time: Utc::now(),
            end_time: Utc::now(),
            duration_ms: 1,
            assertion_plan: plan,
            assertions_ran,
            trace_path: None,
            log: None,
        }
    }

    fn passed_step(index: usize) -> StepResult {
        let mut step = StepResult::pending(index, format!("step {}", index));
        step.status = StepStatus::Passed;
        step
    }

    #[test]
    fn test_positional_override_keeps_tail() {
        let prior = vec![act("a", Some(true), None), act("b", None, None), act("c", None, None)];
        let current = vec![act("a2", Some(false), Some(false))];
        let merged = merge_steps(&prior, &current);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].action_description, "a2");
        assert_eq!(merged[0].page_load_wait_attempted, Some(true));
        assert_eq!(merged[2].action_description, "c");
    }

    #[test]
    fn test_timed_out_is_sticky() {
        let prior = vec![act("a", Some(true), Some(true))];
        let current = vec![act("a", Some(false), Some(false))];
        let merged = merge_steps(&prior, &current);
        assert_eq!(merged[0].page_load_wait_timed_out, Some(true));
    }

    #[test]
    fn test_plan_kept_when_assertions_did_not_run() {
        let plan = AssertionPlan {
            summary: "s".to_string(),
            assertions: vec![AssertionPlanItem::Url {
                value: "/d".to_string(),
            }],
            expected_result: Some("on /d".to_string()),
        };
        let mut prior = PersistedResult::from_run(&run(vec![passed_step(0)], Some(plan.clone()), true));
        assert!(prior.assertion_plan.is_some());

        let merged = merge_result(Some(&prior), &run(vec![passed_step(0)], None, false));
        assert_eq!(merged.assertion_plan, Some(plan.to_value()));

        // verification ran and failed: plan dropped so the next run re-plans
        prior = merged;
        let merged = merge_result(Some(&prior), &run(vec![passed_step(0)], None, true));
        assert!(merged.assertion_plan.is_none());
    }

    #[test]
    fn test_api_records_union() {
        let prior = BTreeMap::from([("/a".to_string(), json!({"type": "object"}))]);
        let recorded = BTreeMap::from([("/b".to_string(), json!({"type": "array"}))]);
        let merged = merge_api_records(Some(&prior), &recorded).unwrap();
        assert_eq!(merged.len(), 2);
        assert!(merge_api_records(None, &BTreeMap::new()).is_none());
    }
}
