//! Batching, session isolation and teardown across many cases

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use step_replay::config::Config;
use step_replay::driver::{MockBrowser, MockBrowserFactory, MockPage, MockPlanner, MockReply};
use step_replay::store::CaseStore;
use step_replay::{CaseStatus, RunContext, Scheduler, TestCase};

fn factory() -> MockBrowserFactory {
    MockBrowserFactory::new(|_| {
        MockBrowser::new(vec![
            MockPage::new("https://x/")
                .title("Home")
                .button("#go", "Go", Some("https://x/done")),
            MockPage::new("https://x/done").text("Done"),
        ])
        .with_latency(Duration::from_millis(20))
    })
}

fn planner() -> Arc<MockPlanner> {
    Arc::new(MockPlanner::new().on_plan(
        "click go",
        MockReply::Actions(json!([{"selector": "#go", "method": "click"}])),
    ))
}

fn cases() -> Vec<TestCase> {
    (1..=5)
        .map(|i| {
            // TC-2 asks for something the planner cannot do
            let step = if i == 2 { "click nowhere" } else { "click go" };
            TestCase::new(format!("TC-{}", i), "https://x/").step(step)
        })
        .collect()
}

fn context(concurrency: usize) -> RunContext {
    let mut config = Config::defaults();
    config.run.concurrency = concurrency;
    config.run.settle_timeout = Duration::from_millis(100);
    config.run.trace = false;
    RunContext::new(planner(), &config)
}

#[tokio::test]
async fn test_batches_and_closes_every_session() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(CaseStore::open(tmp.path()).unwrap());
    let factory = Arc::new(factory());

    let report = Scheduler::new(factory.clone(), store.clone(), context(2))
        .run(&cases())
        .await;

    assert_eq!(report.batches, vec![2, 2, 1]);
    assert_eq!(report.outcomes.len(), 5);
    assert_eq!(report.failed(), 1);
    assert_eq!(factory.launches(), 5);
    assert_eq!(factory.closes(), 5);
    assert_eq!(factory.active(), 0);
    assert!(factory.max_active() <= 2);
    for (id, browser) in factory.browsers() {
        assert_eq!(browser.close_calls(), 1, "{} closed once", id);
    }

    let docs = store.load_all().unwrap();
    assert_eq!(docs.len(), 5);
    let failed = docs.iter().find(|d| d.id() == "TC-2").unwrap();
    assert_eq!(failed.result.as_ref().unwrap().status, CaseStatus::Failed);
    assert!(failed.result.as_ref().unwrap().log.is_some());
}

#[tokio::test]
async fn test_launch_failure_is_recorded_and_siblings_continue() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(CaseStore::open(tmp.path()).unwrap());
    let factory = Arc::new(factory().fail_launch_for("TC-3"));

    let report = Scheduler::new(factory.clone(), store.clone(), context(5))
        .run(&cases())
        .await;

    assert_eq!(report.batches, vec![5]);
    assert_eq!(factory.launches(), 4);
    assert_eq!(factory.closes(), 4);
    assert_eq!(report.failed(), 2);

    let doc = store.load("TC-3").unwrap().unwrap();
    let result = doc.result.unwrap();
    assert_eq!(result.status, CaseStatus::Failed);
    assert!(result.error.unwrap().contains("browser launch failed"));
}

#[tokio::test]
async fn test_second_run_of_the_batch_replays() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(CaseStore::open(tmp.path()).unwrap());
    let good: Vec<TestCase> = cases().into_iter().filter(|c| c.id != "TC-2").collect();

    Scheduler::new(Arc::new(factory()), store.clone(), context(2))
        .run(&good)
        .await;

    let quiet = Arc::new(MockPlanner::new());
    let mut config = Config::defaults();
    config.run.settle_timeout = Duration::from_millis(100);
    config.run.trace = false;
    let report = Scheduler::new(
        Arc::new(factory()),
        store,
        RunContext::new(quiet.clone(), &config),
    )
    .run(&good)
    .await;

    assert!(report.all_passed());
    assert_eq!(quiet.total_calls(), 0);
}
