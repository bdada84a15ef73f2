//! End-to-end case runs against scripted browsers and planners

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use step_replay::assertion::AssertionPlanItem;
use step_replay::codec::{ActResult, ActionMethod, ActionRecord};
use step_replay::config::Config;
use step_replay::driver::{MockBrowser, MockPage, MockPlanner, MockReply};
use step_replay::store::{CaseStore, PersistedCase, PersistedResult};
use step_replay::{BrowserDriver, CaseStatus, RunContext, StepPath, TestCase, run_case, shutdown};

fn login_pages() -> Vec<MockPage> {
    vec![
        MockPage::new("https://x/login")
            .title("Login")
            .input("#username", "Username")
            .input("#password", "Password")
            .button("#login", "Log in", Some("https://x/dashboard")),
        MockPage::new("https://x/dashboard")
            .title("Dashboard")
            .text("Welcome back"),
    ]
}

fn login_case() -> TestCase {
    TestCase::new("TC-1", "https://x/login")
        .step("fill username 'a'")
        .step("fill password 'b'")
        .step("click login")
        .expect("redirect to /dashboard")
}

fn login_planner() -> MockPlanner {
    MockPlanner::new()
        .on_plan(
            "fill username 'a'",
            MockReply::Actions(json!([{"selector": "#username", "method": "fill", "arguments": ["a"]}])),
        )
        .on_plan(
            "fill password 'b'",
            MockReply::Actions(json!([{"xpath": "#password", "action": "fill", "value": "b"}])),
        )
        .on_plan(
            "click login",
            MockReply::Actions(json!({"actions": [{"selector": "#login", "method": "click"}]})),
        )
        .assertion_reply(
            r#"{"summary": "user lands on the dashboard",
                "assertions": [{"kind": "observation", "text": "the URL path is /dashboard"}]}"#,
        )
}

fn context(planner: Arc<MockPlanner>) -> RunContext {
    let mut config = Config::defaults();
    config.run.settle_timeout = Duration::from_millis(50);
    config.run.trace = false;
    RunContext::new(planner, &config)
}

#[tokio::test]
async fn test_first_run_plans_then_second_run_replays() {
    let tmp = tempfile::tempdir().unwrap();
    let store = CaseStore::open(tmp.path()).unwrap();
    let case = login_case();
    store.create(case.clone()).unwrap();

    // First run: no history, every step planned
    let planner = Arc::new(login_planner());
    let prior = store.load("TC-1").unwrap();
    let browser = Arc::new(MockBrowser::new(login_pages()));
    let first = run_case(browser.clone(), &case, prior.as_ref(), &context(planner.clone())).await;

    assert!(first.result.passed(), "{:?}", first.result.error);
    assert_eq!(first.result.count_path(StepPath::Plan), 3);
    assert_eq!(planner.plan_calls(), 3);
    let plan = first.result.assertion_plan.clone().unwrap();
    assert!(plan.assertions.contains(&AssertionPlanItem::Url {
        value: "/dashboard".to_string()
    }));
    assert_eq!(browser.value_of("#password").as_deref(), Some("b"));
    store
        .load_merge_save(&case, &first.result, &first.api_records)
        .unwrap();

    // Second run: full history, nothing planned
    let planner = Arc::new(MockPlanner::new());
    let prior = store.load("TC-1").unwrap();
    let browser = Arc::new(MockBrowser::new(login_pages()));
    let second = run_case(browser.clone(), &case, prior.as_ref(), &context(planner.clone())).await;

    assert!(second.result.passed(), "{:?}", second.result.error);
    assert_eq!(second.result.count_path(StepPath::Replay), 3);
    assert_eq!(planner.total_calls(), 0);
    assert_eq!(second.result.assertion_plan, Some(plan));
    assert_eq!(
        browser.interactions(),
        vec!["fill #username", "fill #password", "click #login"]
    );
}

#[tokio::test]
async fn test_repeated_runs_leave_the_same_history() {
    let tmp = tempfile::tempdir().unwrap();
    let store = CaseStore::open(tmp.path()).unwrap();
    let case = login_case();

    let mut docs = Vec::new();
    for planner in [login_planner(), MockPlanner::new(), MockPlanner::new()] {
        let prior = store.load("TC-1").unwrap();
        let browser = Arc::new(MockBrowser::new(login_pages()));
        let outcome = run_case(browser, &case, prior.as_ref(), &context(Arc::new(planner))).await;
        assert!(outcome.result.passed());
        docs.push(
            store
                .load_merge_save(&case, &outcome.result, &outcome.api_records)
                .unwrap(),
        );
    }

    let steps = |doc: &PersistedCase| doc.result.as_ref().unwrap().steps.clone();
    assert_eq!(steps(&docs[1]), steps(&docs[2]));
    assert_eq!(
        docs[1].result.as_ref().unwrap().assertion_plan,
        docs[2].result.as_ref().unwrap().assertion_plan
    );
}

#[tokio::test]
async fn test_edited_expectation_is_planned_again() {
    let tmp = tempfile::tempdir().unwrap();
    let store = CaseStore::open(tmp.path()).unwrap();
    let case = login_case();

    let browser = Arc::new(MockBrowser::new(login_pages()));
    let first = run_case(browser, &case, None, &context(Arc::new(login_planner()))).await;
    assert!(first.result.passed());
    store
        .load_merge_save(&case, &first.result, &first.api_records)
        .unwrap();

    let edited = login_case().expect("redirect to /settings");
    let planner = Arc::new(MockPlanner::new().assertion_reply(
        r#"{"summary": "user lands on settings",
            "assertions": [{"kind": "url", "value": "/settings"}]}"#,
    ));
    let prior = store.load("TC-1").unwrap();
    let browser = Arc::new(MockBrowser::new(login_pages()));
    let second = run_case(browser, &edited, prior.as_ref(), &context(planner.clone())).await;

    assert_eq!(planner.assertion_calls(), 1);
    assert_eq!(planner.plan_calls(), 0);
    assert!(!second.result.passed());
    assert!(second.result.actual_result.contains("/settings"));
    assert!(second.result.assertion_plan.is_none());
}

fn cached(instruction: &str, selector: &str, timed_out: bool) -> ActResult {
    ActResult {
        success: true,
        message: String::new(),
        action_description: instruction.to_string(),
        actions: vec![ActionRecord::new(selector, ActionMethod::Fill).arg("x")],
        page_load_wait_attempted: Some(true),
        page_load_wait_timed_out: Some(timed_out),
    }
}

#[tokio::test]
async fn test_timed_out_step_is_never_waited_on_again() {
    let tmp = tempfile::tempdir().unwrap();
    let store = CaseStore::open(tmp.path()).unwrap();
    let case = TestCase::new("TC-2", "https://x/form")
        .step("fill first")
        .step("fill second")
        .step("fill third");
    let mut doc = PersistedCase::new(case.clone());
    doc.result = Some(PersistedResult {
        status: CaseStatus::Passed,
        steps: vec![
            cached("fill first", "#first", false),
            cached("fill second", "#second", true),
            cached("fill third", "#third", false),
        ],
        actual_result: String::new(),
        error: None,
        start_time: Utc::now(),
        end_time: Utc::now(),
        duration: 0,
        assertion_plan: None,
        trace_path: None,
        log: None,
    });
    store.save(&doc).unwrap();

    let page = || {
        MockPage::new("https://x/form")
            .input("#first", "First")
            .input("#second", "Second")
            .input("#third", "Third")
    };

    for _ in 0..2 {
        let prior = store.load("TC-2").unwrap();
        let browser = Arc::new(MockBrowser::new(vec![page()]));
        let outcome = run_case(
            browser.clone(),
            &case,
            prior.as_ref(),
            &context(Arc::new(MockPlanner::new())),
        )
        .await;

        let attempted: Vec<bool> = outcome
            .result
            .steps
            .iter()
            .map(|s| s.page_load_wait_attempted)
            .collect();
        assert_eq!(attempted, vec![true, false, true]);
        assert_eq!(browser.settle_waits(), 2);

        let merged = store
            .load_merge_save(&case, &outcome.result, &outcome.api_records)
            .unwrap();
        let steps = merged.result.unwrap().steps;
        assert_eq!(steps[1].page_load_wait_timed_out, Some(true));
    }
}

#[tokio::test]
async fn test_malformed_assertion_plan_falls_back_to_text() {
    let case = TestCase::new("TC-4", "https://x/login")
        .step("click login")
        .expect("Welcome back");
    let planner = Arc::new(
        MockPlanner::new()
            .on_plan(
                "click login",
                MockReply::Actions(json!([{"selector": "#login", "method": "click"}])),
            )
            .assertion_reply("Looks fine to me!"),
    );
    let browser = Arc::new(MockBrowser::new(login_pages()));
    let outcome = run_case(browser, &case, None, &context(planner.clone())).await;

    assert!(outcome.result.passed(), "{:?}", outcome.result.error);
    assert_eq!(planner.assertion_calls(), 1);
    assert!(outcome.result.assertion_plan.is_none());
    assert!(outcome.result.actual_result.contains("PASS text present"));

    let missing = TestCase::new("TC-5", "https://x/login")
        .step("click login")
        .expect("Goodbye");
    let browser = Arc::new(MockBrowser::new(login_pages()));
    let outcome = run_case(browser, &missing, None, &context(planner)).await;

    assert!(!outcome.result.passed());
    assert!(outcome.result.steps.iter().all(|s| s.passed()));
    let log = outcome.result.log.unwrap();
    assert!(log.contains("checking text presence"));
    assert!(outcome.result.actual_result.contains("FAIL"));
}

#[tokio::test]
async fn test_opaque_step_actions_come_from_capture() {
    let case = TestCase::new("TC-6", "https://x/login").step("sign in");
    let planner = Arc::new(
        MockPlanner::new()
            .on_plan("sign in", MockReply::Actions(json!("I clicked the button")))
            .on_act(
                "sign in",
                MockReply::Opaque {
                    perform: vec![ActionRecord::new("#login", ActionMethod::Click)],
                    success: true,
                },
            ),
    );
    let browser = Arc::new(MockBrowser::new(login_pages()));
    let outcome = run_case(browser.clone(), &case, None, &context(planner.clone())).await;

    assert!(outcome.result.passed(), "{:?}", outcome.result.error);
    assert_eq!(planner.act_calls(), 1);
    let step = &outcome.result.steps[0];
    assert_eq!(step.actions.len(), 1);
    assert_eq!(step.actions[0].selector, "#login");
    assert_eq!(step.actions[0].method, ActionMethod::Click);
    assert_eq!(browser.current_url().await.unwrap(), "https://x/dashboard");
}

#[tokio::test]
async fn test_interrupt_between_steps_saves_failed_result() {
    let tmp = tempfile::tempdir().unwrap();
    let store = CaseStore::open(tmp.path()).unwrap();
    let case = TestCase::new("TC-7", "https://x/form")
        .step("fill first")
        .step("fill second");
    let planner = Arc::new(
        MockPlanner::new()
            .on_plan(
                "fill first",
                MockReply::Actions(json!([{"selector": "#first", "method": "fill", "arguments": ["1"]}])),
            )
            .on_plan(
                "fill second",
                MockReply::Actions(json!([{"selector": "#second", "method": "fill", "arguments": ["2"]}])),
            ),
    );
    let browser = Arc::new(
        MockBrowser::new(vec![
            MockPage::new("https://x/form")
                .input("#first", "First")
                .input("#second", "Second"),
        ])
        .with_latency(Duration::from_millis(300)),
    );

    let (trigger, signal) = shutdown::channel();
    let ctx = context(planner.clone()).with_shutdown(signal);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.trigger();
    });

    let outcome = run_case(browser, &case, None, &ctx).await;
    assert_eq!(outcome.result.status, CaseStatus::Failed);
    assert_eq!(outcome.result.error.as_deref(), Some("interrupted"));
    assert_eq!(outcome.result.steps.len(), 1);
    assert!(outcome.result.steps[0].passed());
    assert_eq!(planner.plan_calls(), 1);

    let saved = store
        .load_merge_save(&case, &outcome.result, &outcome.api_records)
        .unwrap();
    let result = saved.result.unwrap();
    assert_eq!(result.error.as_deref(), Some("interrupted"));
    assert_eq!(result.steps.len(), 1);
}

#[tokio::test]
async fn test_api_shapes_recorded_then_validated() {
    use step_replay::driver::CapturedRequest;

    let pages = |body: serde_json::Value| {
        vec![
            MockPage::new("https://x/login")
                .button("#login", "Log in", None)
                .request_on(
                    "#login",
                    CapturedRequest {
                        url: "https://x/api/login".to_string(),
                        method: "POST".to_string(),
                        body: Some(body),
                    },
                ),
        ]
    };
    let mut case = TestCase::new("TC-8", "https://x/login").step("click login");
    case.api_urls = vec!["/api/login".to_string()];
    let planner = || {
        Arc::new(MockPlanner::new().on_plan(
            "click login",
            MockReply::Actions(json!([{"selector": "#login", "method": "click"}])),
        ))
    };

    let tmp = tempfile::tempdir().unwrap();
    let store = CaseStore::open(tmp.path()).unwrap();
    let browser = Arc::new(MockBrowser::new(pages(json!({"user": "a", "password": "b"}))));
    let recorded = run_case(browser, &case, None, &context(planner())).await;
    assert!(recorded.result.passed());
    assert!(recorded.api_records.contains_key("/api/login"));
    store
        .load_merge_save(&case, &recorded.result, &recorded.api_records)
        .unwrap();

    case.validate_api_urls = vec!["/api/login".to_string()];
    let prior = store.load("TC-8").unwrap();
    let browser = Arc::new(MockBrowser::new(pages(json!({"user": "a"}))));
    let validated = run_case(browser, &case, prior.as_ref(), &context(planner())).await;
    assert!(!validated.result.passed());
    assert!(validated.result.error.unwrap().contains("$.password: missing property"));
}
