//! Runs one test case against one browser session.
//!
//! Order of work: start trace, navigate (one looser retry on timeout), start
//! capture, run steps strictly in order with a settle wait after each, verify
//! the expected result if every step passed, check API traffic, then stop
//! capture and trace. The first case-fatal error skips the remaining steps.
//! Closing the session is the caller's job.

use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::decision::CaseHistory;
use super::executor::{StepContext, execute_step};
use super::settle::settle_after_step;
use super::{EngineError, EngineResult};
use crate::api::{ApiOutcome, ShapeValidator, process_requests};
use crate::assertion::{VerifyOutcome, verify_expected};
use crate::capture::CaptureContext;
use crate::config::{CaptureSettings, Config, RunSettings};
use crate::driver::{ActionPlanner, BrowserDriver, SchemaValidator, WaitPolicy};
use crate::model::{CaseLog, CaseStatus, StepResult, StepStatus, TestCase, TestResult};
use crate::session::Session;
use crate::shutdown::ShutdownSignal;
use crate::store::PersistedCase;

/// Shared collaborators and settings for every case in a run
#[derive(Clone)]
pub struct RunContext {
    pub planner: Arc<dyn ActionPlanner>,
    pub validator: Arc<dyn SchemaValidator>,
    pub run: RunSettings,
    pub capture: CaptureSettings,
    /// Where trace artifacts go; tracing is off without one
    pub session: Option<Arc<Session>>,
    pub shutdown: ShutdownSignal,
}

impl RunContext {
    pub fn new(planner: Arc<dyn ActionPlanner>, config: &Config) -> Self {
        Self {
            planner,
            validator: Arc::new(ShapeValidator),
            run: config.run.clone(),
            capture: config.capture.clone(),
            session: None,
            shutdown: ShutdownSignal::never(),
        }
    }

    pub fn with_session(mut self, session: Arc<Session>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = validator;
        self
    }
}

/// Everything a finished case hands to the store
#[derive(Debug, Clone)]
pub struct CaseOutcome {
    pub result: TestResult,
    pub api_records: BTreeMap<String, Value>,
}

pub async fn run_case(
    driver: Arc<dyn BrowserDriver>,
    case: &TestCase,
    prior: Option<&PersistedCase>,
    ctx: &RunContext,
) -> CaseOutcome {
    let start_time = Utc::now();
    let started = Instant::now();
    let mut log = CaseLog::new(&case.id);
    let history = CaseHistory::from_persisted(prior);
    log.push(format!(
        "case {}: {} step(s), {} in history",
        case.id,
        case.steps.len(),
        history.len()
    ));

    let trace_started = start_trace(driver.as_ref(), case, ctx, &mut log).await;

    let mut capture = CaptureContext::new(Arc::clone(&driver), ctx.capture.clone());
    let mut steps = Vec::new();
    let mut verify: Option<VerifyOutcome> = None;
    let mut api = ApiOutcome::default();

    let navigation = tokio::select! {
        biased;
        _ = ctx.shutdown.triggered() => Err(EngineError::Interrupted),
        result = navigate(driver.as_ref(), &case.url, ctx.run.navigation_timeout, &mut log) => result,
    };

    let mut failure = match navigation {
        Ok(()) => {
            capture.start().await;
            run_steps(driver.as_ref(), case, &history, ctx, &capture, &mut steps, &mut log)
                .await
                .err()
        }
        Err(e) => Some(e),
    };

    if failure.is_none() {
        if let Some(expected) = case.expected_result.as_deref().filter(|e| !e.trim().is_empty()) {
            if ctx.shutdown.is_triggered() {
                failure = Some(EngineError::Interrupted);
            } else {
                let cached = prior
                    .and_then(|p| p.result.as_ref())
                    .and_then(|r| r.assertion_plan.as_ref());
                let outcome = verify_expected(
                    expected,
                    cached,
                    driver.as_ref(),
                    ctx.planner.as_ref(),
                    &mut log,
                )
                .await;
                if let Some(e) = &outcome.error {
                    failure = Some(EngineError::Assertion(e.to_string()));
                }
                verify = Some(outcome);
            }
        }
    }

    if !case.api_urls.is_empty() || !case.validate_api_urls.is_empty() {
        match driver.drain_requests().await {
            Ok(requests) => {
                api = process_requests(
                    case,
                    &requests,
                    prior.and_then(|p| p.api_records.as_ref()),
                    ctx.validator.as_ref(),
                    &mut log,
                );
                if !api.passed() && failure.is_none() {
                    failure = Some(EngineError::Api(api.failures.join("; ")));
                }
            }
            Err(e) => log.push(format!("api: could not read requests ({})", e)),
        }
    }

    // Flush whatever capture still buffers; on interrupt it belongs to the
    // step that was cut short.
    let flushed = capture.stop().await;
    if !flushed.is_empty() {
        let interrupted = matches!(failure, Some(EngineError::Interrupted));
        match steps.last_mut() {
            Some(last) if interrupted && !last.passed() => {
                log.push(format!("capture: {} buffered action(s) saved", flushed.len()));
                last.actions.extend(flushed);
            }
            _ => log.push(format!("capture: {} trailing interaction(s) ignored", flushed.len())),
        }
    }
    let capture_failures = capture.failures().await;
    if !capture_failures.is_empty() {
        log.push(format!("capture degraded: {} failure(s)", capture_failures.len()));
    }

    let trace_path = if trace_started {
        match driver.stop_trace().await {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("failed to stop trace for {}: {}", case.id, e);
                None
            }
        }
    } else {
        None
    };

    let passed = failure.is_none();
    let report = verify.as_ref().map(|v| v.report.join("\n"));
    let actual_result = match (&failure, report) {
        (Some(EngineError::Assertion(_)), Some(report)) => report,
        (Some(e), _) => e.to_string(),
        (None, Some(report)) => report,
        (None, None) => format!("all {} step(s) passed", steps.len()),
    };

    log.push(format!(
        "case {} {}",
        case.id,
        if passed { "passed" } else { "failed" }
    ));
    if passed {
        tracing::info!("{} passed ({} step(s))", case.id, steps.len());
    } else if let Some(e) = &failure {
        tracing::warn!("{} failed: {}", case.id, e);
    }

    let result = TestResult {
        id: case.id.clone(),
        status: if passed {
            CaseStatus::Passed
        } else {
            CaseStatus::Failed
        },
        steps,
        actual_result,
        error: failure.as_ref().map(ToString::to_string),
        start_time,
        end_time: Utc::now(),
        duration_ms: started.elapsed().as_millis() as u64,
        assertion_plan: verify.as_ref().and_then(|v| v.plan.clone()),
        assertions_ran: verify.is_some(),
        trace_path,
        log: (!passed).then(|| log.render()),
    };

    CaseOutcome {
        result,
        api_records: api.records,
    }
}

async fn start_trace(
    driver: &dyn BrowserDriver,
    case: &TestCase,
    ctx: &RunContext,
    log: &mut CaseLog,
) -> bool {
    let Some(session) = ctx.session.as_ref().filter(|_| ctx.run.trace) else {
        return false;
    };
    let path = session.trace_path(&case.id);
    match driver.start_trace(&path).await {
        Ok(()) => {
            log.push(format!("tracing to {}", path.display()));
            true
        }
        Err(e) => {
            tracing::warn!("failed to start trace for {}: {}", case.id, e);
            false
        }
    }
}

/// Navigate to the case URL, retrying once with a looser wait on timeout
async fn navigate(
    driver: &dyn BrowserDriver,
    url: &str,
    timeout: Duration,
    log: &mut CaseLog,
) -> EngineResult<()> {
    let mut policy = WaitPolicy::Load;
    let mut attempts = 0;
    loop {
        attempts += 1;
        match driver.navigate(url, policy, timeout).await {
            Ok(()) => {
                log.push(format!("navigated to {} ({})", url, policy.as_str()));
                return Ok(());
            }
            Err(e) if e.is_timeout() => match policy.looser() {
                Some(looser) if attempts == 1 => {
                    log.push(format!(
                        "navigation timed out waiting for {}, retrying with {}",
                        policy.as_str(),
                        looser.as_str()
                    ));
                    policy = looser;
                }
                _ => {
                    return Err(EngineError::NavigationTimeout {
                        url: url.to_string(),
                        attempts,
                        timeout,
                    });
                }
            },
            Err(e) => return Err(EngineError::Navigation(e.to_string())),
        }
    }
}

async fn run_steps(
    driver: &dyn BrowserDriver,
    case: &TestCase,
    history: &CaseHistory,
    ctx: &RunContext,
    capture: &CaptureContext,
    steps: &mut Vec<StepResult>,
    log: &mut CaseLog,
) -> EngineResult<()> {
    let step_ctx = StepContext {
        driver,
        planner: ctx.planner.as_ref(),
        capture,
    };

    for (index, instruction) in case.steps.iter().enumerate() {
        if ctx.shutdown.is_triggered() {
            log.push(format!("interrupted before step {}", index + 1));
            return Err(EngineError::Interrupted);
        }

        let url_before = driver.current_url().await.unwrap_or_default();
        let decision = history.decide(index, instruction);
        let path = decision.path();
        log.push(format!("step {}: {} [{:?}]", index + 1, instruction, path));

        let mut step = StepResult::pending(index, instruction.as_str());
        step.path = Some(path);

        let execution = tokio::select! {
            biased;
            _ = ctx.shutdown.triggered() => None,
            execution = execute_step(&step_ctx, instruction, decision, log) => Some(execution),
        };

        let Some(execution) = execution else {
            log.push(format!("interrupted during step {}", index + 1));
            step.status = StepStatus::Failed;
            step.error = Some(EngineError::Interrupted.to_string());
            steps.push(step);
            return Err(EngineError::Interrupted);
        };

        step.path = Some(execution.path);
        step.actions = execution.actions;
        step.message = execution.message;

        if let Some(error) = execution.error {
            log.push(format!("step {} failed: {}", index + 1, error));
            step.status = StepStatus::Failed;
            step.error = Some(error.to_string());
            steps.push(step);
            return Err(error);
        }

        step.status = StepStatus::Passed;
        let settle = settle_after_step(
            driver,
            &url_before,
            history.wait_timed_out(index),
            ctx.run.settle_timeout,
            log,
        )
        .await;
        step.page_load_wait_attempted = settle.attempted;
        step.page_load_wait_timed_out = settle.timed_out;
        steps.push(step);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ActionMethod, ActionRecord};
    use crate::driver::{MockBrowser, MockPage, MockPlanner, MockReply};
    use serde_json::json;

    fn pages() -> Vec<MockPage> {
        vec![
            MockPage::new("https://x/a")
                .button("#next", "Next", Some("https://x/b")),
            MockPage::new("https://x/b").text("Done"),
        ]
    }

    fn context(planner: MockPlanner) -> RunContext {
        let mut config = Config::defaults();
        config.run.settle_timeout = Duration::from_millis(50);
        RunContext::new(Arc::new(planner), &config)
    }

    #[tokio::test]
    async fn test_navigation_retries_once_with_commit() {
        let browser = Arc::new(MockBrowser::new(pages()).with_navigation_failures(1));
        let case = TestCase::new("t", "https://x/a");
        let outcome = run_case(browser.clone(), &case, None, &context(MockPlanner::new())).await;
        assert!(outcome.result.passed());
        let policies: Vec<WaitPolicy> = browser.navigations().into_iter().map(|(_, p)| p).collect();
        assert_eq!(policies, vec![WaitPolicy::Load, WaitPolicy::Commit]);
    }

    #[tokio::test]
    async fn test_navigation_fails_after_retry() {
        let browser = Arc::new(MockBrowser::new(pages()).with_navigation_failures(2));
        let case = TestCase::new("t", "https://x/a").step("click next");
        let outcome = run_case(browser, &case, None, &context(MockPlanner::new())).await;
        assert!(!outcome.result.passed());
        assert!(outcome.result.steps.is_empty());
        assert!(outcome.result.error.unwrap().contains("2 attempt(s)"));
        assert!(outcome.result.log.is_some());
    }

    #[tokio::test]
    async fn test_failed_step_skips_the_rest() {
        let browser = Arc::new(MockBrowser::new(pages()));
        let planner = MockPlanner::new()
            .on_plan("click missing", MockReply::Actions(json!([{"selector": "#missing", "method": "click"}])));
        let case = TestCase::new("t", "https://x/a")
            .step("click missing")
            .step("click next");
        let outcome = run_case(browser, &case, None, &context(planner)).await;
        assert_eq!(outcome.result.steps.len(), 1);
        assert_eq!(outcome.result.steps[0].status, StepStatus::Failed);
        assert!(!outcome.result.assertions_ran);
    }

    #[tokio::test]
    async fn test_interrupt_saves_failed_result() {
        let browser = Arc::new(MockBrowser::new(pages()));
        let (trigger, signal) = crate::shutdown::channel();
        trigger.trigger();
        let ctx = context(MockPlanner::new()).with_shutdown(signal);
        let case = TestCase::new("t", "https://x/a").step("click next");
        let outcome = run_case(browser, &case, None, &ctx).await;
        assert_eq!(outcome.result.error.as_deref(), Some("interrupted"));
        assert_eq!(outcome.result.status, CaseStatus::Failed);
    }

    #[tokio::test]
    async fn test_replay_uses_cached_actions() {
        let browser = Arc::new(MockBrowser::new(pages()));
        let case = TestCase::new("t", "https://x/a").step("click next");
        let mut prior = PersistedCase::new(case.clone());
        let mut first = StepResult::pending(0, "click next");
        first.status = StepStatus::Passed;
        first.actions = vec![ActionRecord::new("#next", ActionMethod::Click)];
        prior.result = Some(crate::store::PersistedResult::from_run(&TestResult {
            id: "t".to_string(),
            status: CaseStatus::Passed,
            steps: vec![first],
            actual_result: String::new(),
            error: None,
            start_time: Utc::now(),
            end_time: Utc::now(),
            duration_ms: 0,
            assertion_plan: None,
            assertions_ran: false,
            trace_path: None,
            log: None,
        }));

        let planner = Arc::new(MockPlanner::new());
        let mut config = Config::defaults();
        config.run.settle_timeout = Duration::from_millis(50);
        let ctx = RunContext::new(planner.clone(), &config);
        let outcome = run_case(browser.clone(), &case, Some(&prior), &ctx).await;

        assert!(outcome.result.passed());
        assert_eq!(planner.total_calls(), 0);
        assert_eq!(browser.current_url().await.unwrap(), "https://x/b");
    }
}
