//! Load-merge-save behaviour of the case store

use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use step_replay::codec::{ActionMethod, ActionRecord};
use step_replay::store::CaseStore;
use step_replay::{CaseStatus, StepResult, StepStatus, TestCase, TestResult};

fn run(steps: Vec<StepResult>) -> TestResult {
    TestResult {
        id: "TC-1".to_string(),
        status: CaseStatus::Passed,
        steps,
        actual_result: "ok".to_string(),
        error: None,
        start_time: Utc::now(),
        end_time: Utc::now(),
        duration_ms: 5,
        assertion_plan: None,
        assertions_ran: false,
        trace_path: None,
        log: None,
    }
}

fn step(index: usize, instruction: &str, timed_out: bool) -> StepResult {
    let mut step = StepResult::pending(index, instruction);
    step.status = StepStatus::Passed;
    step.actions = vec![ActionRecord::new(format!("#s{}", index), ActionMethod::Click)];
    step.page_load_wait_attempted = !timed_out;
    step.page_load_wait_timed_out = timed_out;
    step
}

fn case() -> TestCase {
    TestCase::new("TC-1", "https://x/")
        .step("one")
        .step("two")
        .step("three")
}

#[test]
fn test_empty_run_leaves_history_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let store = CaseStore::open(tmp.path()).unwrap();
    let case = case();

    let full = run(vec![step(0, "one", false), step(1, "two", true), step(2, "three", false)]);
    let before = store
        .load_merge_save(&case, &full, &BTreeMap::new())
        .unwrap()
        .result
        .unwrap()
        .steps;

    let mut empty = run(Vec::new());
    empty.status = CaseStatus::Failed;
    empty.error = Some("navigation failed".to_string());
    let after = store
        .load_merge_save(&case, &empty, &BTreeMap::new())
        .unwrap()
        .result
        .unwrap();

    assert_eq!(after.steps, before);
    assert_eq!(after.status, CaseStatus::Failed);
}

#[test]
fn test_wait_timeout_flag_survives_later_runs() {
    let tmp = tempfile::tempdir().unwrap();
    let store = CaseStore::open(tmp.path()).unwrap();
    let case = case();

    store
        .load_merge_save(&case, &run(vec![step(0, "one", true)]), &BTreeMap::new())
        .unwrap();
    let merged = store
        .load_merge_save(&case, &run(vec![step(0, "one", false)]), &BTreeMap::new())
        .unwrap();

    let steps = merged.result.unwrap().steps;
    assert_eq!(steps[0].page_load_wait_timed_out, Some(true));
    assert_eq!(steps[0].page_load_wait_attempted, Some(true));
}

#[test]
fn test_definition_edits_survive_a_run() {
    let tmp = tempfile::tempdir().unwrap();
    let store = CaseStore::open(tmp.path()).unwrap();
    let mut doc = store.create(case()).unwrap();

    // Edited on disk while the run was in flight
    doc.case.expected_result = Some("see Done".to_string());
    store.save(&doc).unwrap();

    let merged = store
        .load_merge_save(&case(), &run(vec![step(0, "one", false)]), &BTreeMap::new())
        .unwrap();
    assert_eq!(merged.case.expected_result.as_deref(), Some("see Done"));
}

#[test]
fn test_api_records_accumulate() {
    let tmp = tempfile::tempdir().unwrap();
    let store = CaseStore::open(tmp.path()).unwrap();
    let case = case();

    let first = BTreeMap::from([("/api/a".to_string(), json!({"type": "object"}))]);
    let second = BTreeMap::from([("/api/b".to_string(), json!({"type": "array"}))]);
    store.load_merge_save(&case, &run(Vec::new()), &first).unwrap();
    let merged = store.load_merge_save(&case, &run(Vec::new()), &second).unwrap();

    let records = merged.api_records.unwrap();
    assert_eq!(records.len(), 2);
}

#[test]
fn test_concurrent_writers_for_different_cases() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(CaseStore::open(tmp.path()).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                let case = TestCase::new(format!("TC-{}", i), "https://x/").step("one");
                let mut result = run(vec![step(0, "one", false)]);
                result.id = case.id.clone();
                store.load_merge_save(&case, &result, &BTreeMap::new()).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.load_all().unwrap().len(), 8);
}

#[test]
fn test_unparseable_documents_are_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let store = CaseStore::open(tmp.path()).unwrap();
    store.create(case()).unwrap();
    fs::write(tmp.path().join("broken.json"), "{not json").unwrap();

    let docs = store.load_all().unwrap();
    assert_eq!(docs.len(), 1);
    assert!(store.load("broken").is_err());
}
