//! Scripted in-memory collaborators for testing.
//!
//! `MockBrowser` models a small set of pages whose elements are addressed by
//! selector. Interactions emit the same raw events the page capture script
//! would, so capture, replay and settle logic can be exercised without a real
//! browser. `MockPlanner` answers plan/act/observe/assertion calls from
//! scripted replies and counts every call.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::backend::{ActionPlanner, BrowserDriver, BrowserFactory};
use super::types::{
    CapturedRequest, DriverError, DriverResult, ObservedMatch, PageState, PlannerError,
    SettleOutcome, WaitPolicy,
};
use crate::capture::{PathSegment, RawCaptureEvent, RawElement, RawEventKind, is_drain_script};
use crate::codec::ActionRecord;
use crate::engine::executor::execute_action;

/// Virtual page-clock advance per interaction, larger than the default
/// debounce and dedup windows
const CLOCK_STEP_MS: f64 = 700.0;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// One element on a [`MockPage`]
#[derive(Debug, Clone, Default)]
pub struct MockElement {
    pub tag: String,
    pub input_type: String,
    pub label: String,
    /// URL loaded when the element is clicked (or Enter is pressed on it)
    pub navigates_to: Option<String>,
    /// Request issued when the element is clicked
    pub request: Option<CapturedRequest>,
}

/// A scripted page
#[derive(Debug, Clone)]
pub struct MockPage {
    pub url: String,
    pub title: String,
    pub text: String,
    pub elements: BTreeMap<String, MockElement>,
    pub settle: SettleOutcome,
}

impl MockPage {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            text: String::new(),
            elements: BTreeMap::new(),
            settle: SettleOutcome::Idle,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn input(self, selector: &str, label: &str) -> Self {
        self.element(selector, "input", "text", label, None)
    }

    pub fn button(self, selector: &str, label: &str, navigates_to: Option<&str>) -> Self {
        self.element(selector, "button", "", label, navigates_to)
    }

    pub fn select(self, selector: &str, label: &str) -> Self {
        self.element(selector, "select", "", label, None)
    }

    pub fn checkbox(self, selector: &str, label: &str) -> Self {
        self.element(selector, "input", "checkbox", label, None)
    }

    /// Network-idle waits on this page time out
    pub fn slow_settle(mut self) -> Self {
        self.settle = SettleOutcome::TimedOut;
        self
    }

    /// Clicking `selector` issues `request`
    pub fn request_on(mut self, selector: &str, request: CapturedRequest) -> Self {
        if let Some(element) = self.elements.get_mut(selector) {
            element.request = Some(request);
        }
        self
    }

    fn element(
        mut self,
        selector: &str,
        tag: &str,
        input_type: &str,
        label: &str,
        navigates_to: Option<&str>,
    ) -> Self {
        self.elements.insert(
            selector.to_string(),
            MockElement {
                tag: tag.to_string(),
                input_type: input_type.to_string(),
                label: label.to_string(),
                navigates_to: navigates_to.map(str::to_string),
                request: None,
            },
        );
        self
    }

    fn outline(&self) -> String {
        let mut lines = vec![format!("title: {}", self.title), format!("text: {}", self.text)];
        for (selector, element) in &self.elements {
            lines.push(format!("{} [{}] {}", selector, element.tag, element.label));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Default)]
struct BrowserState {
    current: Option<String>,
    values: HashMap<String, String>,
    capture_installed: bool,
    events: Vec<RawCaptureEvent>,
    clock: f64,
    requests: Vec<CapturedRequest>,
    navigation_failures: usize,
    navigations: Vec<(String, WaitPolicy)>,
    interactions: Vec<String>,
    settle_waits: usize,
    trace: Option<PathBuf>,
    closed: bool,
    close_calls: usize,
    block_evaluate: bool,
}

/// Shared counters for every browser a [`MockBrowserFactory`] launched
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub launches: AtomicUsize,
    pub closes: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
}

/// In-memory browser session
#[derive(Debug)]
pub struct MockBrowser {
    pages: HashMap<String, MockPage>,
    state: Mutex<BrowserState>,
    latency: Duration,
    counters: Option<Arc<SessionCounters>>,
}

impl MockBrowser {
    pub fn new(pages: Vec<MockPage>) -> Self {
        Self {
            pages: pages.into_iter().map(|page| (page.url.clone(), page)).collect(),
            state: Mutex::new(BrowserState::default()),
            latency: Duration::ZERO,
            counters: None,
        }
    }

    /// Fail the next `n` navigations with a timeout
    pub fn with_navigation_failures(self, n: usize) -> Self {
        lock(&self.state).navigation_failures = n;
        self
    }

    /// Delay applied to every network-idle wait
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Load a page without going through `navigate`
    pub fn open(&self, url: &str) {
        let mut state = lock(&self.state);
        state.current = Some(url.to_string());
        state.capture_installed = false;
    }

    /// Make every script evaluation fail, as a strict CSP would
    pub fn block_evaluate(&self, blocked: bool) {
        lock(&self.state).block_evaluate = blocked;
    }

    /// Interactions in order, as `method selector`
    pub fn interactions(&self) -> Vec<String> {
        lock(&self.state).interactions.clone()
    }

    pub fn navigations(&self) -> Vec<(String, WaitPolicy)> {
        lock(&self.state).navigations.clone()
    }

    pub fn settle_waits(&self) -> usize {
        lock(&self.state).settle_waits
    }

    pub fn close_calls(&self) -> usize {
        lock(&self.state).close_calls
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn value_of(&self, selector: &str) -> Option<String> {
        lock(&self.state).values.get(selector).cloned()
    }

    fn current_page(&self, state: &BrowserState) -> DriverResult<&MockPage> {
        if state.closed {
            return Err(DriverError::Closed);
        }
        let url = state
            .current
            .as_deref()
            .ok_or_else(|| DriverError::Browser("no page loaded".to_string()))?;
        self.pages
            .get(url)
            .ok_or_else(|| DriverError::Navigation(format!("no page at {}", url)))
    }

    /// Resolve an element on the current page and record the interaction
    fn interact(
        &self,
        method: &str,
        selector: &str,
        event: Option<(RawEventKind, Option<String>, Option<bool>)>,
    ) -> DriverResult<MockElement> {
        let mut state = lock(&self.state);
        let element = self
            .current_page(&state)?
            .elements
            .get(selector)
            .cloned()
            .ok_or_else(|| DriverError::SelectorNotFound(selector.to_string()))?;

        state.interactions.push(format!("{} {}", method, selector));
        state.clock += CLOCK_STEP_MS;

        if let Some((kind, value, checked)) = event {
            if state.capture_installed {
                let ts = state.clock;
                state.events.push(RawCaptureEvent {
                    kind,
                    ts,
                    element: raw_element(selector, &element),
                    value,
                    checked,
                });
            }
        }
        Ok(element)
    }

    fn follow(&self, element: &MockElement) {
        let mut state = lock(&self.state);
        if let Some(request) = &element.request {
            state.requests.push(request.clone());
        }
        if let Some(target) = &element.navigates_to {
            state.current = Some(target.clone());
            state.capture_installed = false;
        }
    }
}

/// Describe a mock element the way the page script would
fn raw_element(selector: &str, element: &MockElement) -> RawElement {
    let id = selector.strip_prefix('#').map(str::to_string);
    RawElement {
        tag: element.tag.clone(),
        id_unique: id.is_some(),
        path: if id.is_some() {
            vec![
                PathSegment {
                    tag: "html".to_string(),
                    index: 1,
                },
                PathSegment {
                    tag: "body".to_string(),
                    index: 1,
                },
                PathSegment {
                    tag: element.tag.clone(),
                    index: 1,
                },
            ]
        } else {
            Vec::new()
        },
        id,
        label: element.label.clone(),
        input_type: element.input_type.clone(),
    }
}

#[async_trait]
impl BrowserDriver for MockBrowser {
    async fn navigate(&self, url: &str, policy: WaitPolicy, timeout: Duration) -> DriverResult<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(DriverError::Closed);
        }
        state.navigations.push((url.to_string(), policy));
        if state.navigation_failures > 0 {
            state.navigation_failures -= 1;
            return Err(DriverError::Timeout {
                operation: format!("navigate {} ({})", url, policy.as_str()),
                timeout,
            });
        }
        if !self.pages.contains_key(url) {
            return Err(DriverError::Navigation(format!("no page at {}", url)));
        }
        state.current = Some(url.to_string());
        state.capture_installed = false;
        Ok(())
    }

    async fn exists(&self, selector: &str) -> DriverResult<bool> {
        let state = lock(&self.state);
        Ok(self.current_page(&state)?.elements.contains_key(selector))
    }

    async fn click(&self, selector: &str) -> DriverResult<()> {
        let element = self.interact("click", selector, Some((RawEventKind::Click, None, None)))?;
        self.follow(&element);
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> DriverResult<()> {
        self.interact(
            "fill",
            selector,
            Some((RawEventKind::Input, Some(value.to_string()), None)),
        )?;
        lock(&self.state)
            .values
            .insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> DriverResult<()> {
        let current = self.value_of(selector).unwrap_or_default();
        let value = format!("{}{}", current, text);
        self.interact(
            "type",
            selector,
            Some((RawEventKind::Input, Some(value.clone()), None)),
        )?;
        lock(&self.state).values.insert(selector.to_string(), value);
        Ok(())
    }

    async fn select_option(&self, selector: &str, value: &str) -> DriverResult<()> {
        self.interact(
            "select",
            selector,
            Some((RawEventKind::Change, Some(value.to_string()), None)),
        )?;
        lock(&self.state)
            .values
            .insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn set_checked(&self, selector: &str, checked: bool) -> DriverResult<()> {
        let method = if checked { "check" } else { "uncheck" };
        self.interact(
            method,
            selector,
            Some((RawEventKind::Change, None, Some(checked))),
        )?;
        lock(&self.state)
            .values
            .insert(selector.to_string(), checked.to_string());
        Ok(())
    }

    async fn hover(&self, selector: &str) -> DriverResult<()> {
        self.interact("hover", selector, None)?;
        Ok(())
    }

    async fn press(&self, selector: &str, key: &str) -> DriverResult<()> {
        let element = self.interact("press", selector, None)?;
        if key.eq_ignore_ascii_case("enter") {
            self.follow(&element);
        }
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        let state = lock(&self.state);
        Ok(self.current_page(&state)?.url.clone())
    }

    async fn title(&self) -> DriverResult<String> {
        let state = lock(&self.state);
        Ok(self.current_page(&state)?.title.clone())
    }

    async fn page_text(&self) -> DriverResult<String> {
        let state = lock(&self.state);
        let page = self.current_page(&state)?;
        let labels: Vec<&str> = page.elements.values().map(|e| e.label.as_str()).collect();
        Ok(format!("{}\n{}\n{}", page.title, page.text, labels.join("\n")))
    }

    async fn page_state(&self) -> DriverResult<PageState> {
        let state = lock(&self.state);
        let page = self.current_page(&state)?;
        Ok(PageState {
            url: page.url.clone(),
            title: page.title.clone(),
            outline: page.outline(),
            screenshot: None,
        })
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> DriverResult<SettleOutcome> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut state = lock(&self.state);
        let outcome = self.current_page(&state)?.settle;
        state.settle_waits += 1;
        Ok(outcome)
    }

    async fn evaluate(&self, script: &str) -> DriverResult<Value> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(DriverError::Closed);
        }
        if state.block_evaluate {
            return Err(DriverError::Browser(
                "script evaluation blocked by content security policy".to_string(),
            ));
        }
        if !is_drain_script(script) {
            return Ok(Value::Bool(true));
        }
        let installed = state.capture_installed;
        state.capture_installed = true;
        let events = std::mem::take(&mut state.events);
        Ok(json!({
            "installed": installed,
            "dropped": 0,
            "now": state.clock,
            "events": events,
        }))
    }

    async fn start_trace(&self, path: &Path) -> DriverResult<()> {
        lock(&self.state).trace = Some(path.to_path_buf());
        Ok(())
    }

    async fn stop_trace(&self) -> DriverResult<Option<PathBuf>> {
        Ok(lock(&self.state).trace.take())
    }

    async fn drain_requests(&self) -> DriverResult<Vec<CapturedRequest>> {
        Ok(std::mem::take(&mut lock(&self.state).requests))
    }

    async fn close(&self) -> DriverResult<()> {
        let mut state = lock(&self.state);
        state.close_calls += 1;
        if let Some(counters) = &self.counters {
            counters.closes.fetch_add(1, Ordering::SeqCst);
            if !state.closed {
                counters.active.fetch_sub(1, Ordering::SeqCst);
            }
        }
        state.closed = true;
        Ok(())
    }
}

type BuildFn = dyn Fn(&str) -> MockBrowser + Send + Sync;

/// Launches a fresh [`MockBrowser`] per case and tracks session lifetimes
pub struct MockBrowserFactory {
    build: Box<BuildFn>,
    counters: Arc<SessionCounters>,
    failing: HashSet<String>,
    launched: Mutex<Vec<(String, Arc<MockBrowser>)>>,
}

impl MockBrowserFactory {
    pub fn new(build: impl Fn(&str) -> MockBrowser + Send + Sync + 'static) -> Self {
        Self {
            build: Box::new(build),
            counters: Arc::new(SessionCounters::default()),
            failing: HashSet::new(),
            launched: Mutex::new(Vec::new()),
        }
    }

    /// Launching a session for `case_id` fails
    pub fn fail_launch_for(mut self, case_id: &str) -> Self {
        self.failing.insert(case_id.to_string());
        self
    }

    pub fn launches(&self) -> usize {
        self.counters.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.counters.max_active.load(Ordering::SeqCst)
    }

    /// Sessions launched so far, in launch order
    pub fn browsers(&self) -> Vec<(String, Arc<MockBrowser>)> {
        lock(&self.launched).clone()
    }
}

#[async_trait]
impl BrowserFactory for MockBrowserFactory {
    async fn launch(&self, case_id: &str) -> DriverResult<Arc<dyn BrowserDriver>> {
        if self.failing.contains(case_id) {
            return Err(DriverError::Browser(format!("failed to launch browser for {}", case_id)));
        }
        let mut browser = (self.build)(case_id);
        browser.counters = Some(Arc::clone(&self.counters));
        let browser = Arc::new(browser);

        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_active.fetch_max(active, Ordering::SeqCst);
        lock(&self.launched).push((case_id.to_string(), Arc::clone(&browser)));

        Ok(browser)
    }
}

/// Scripted reply for a plan or act call
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this raw value
    Actions(Value),
    /// Perform these actions against the driver and report only a message,
    /// like an opaque natural-language execution would
    Opaque {
        perform: Vec<ActionRecord>,
        success: bool,
    },
    Fail(PlannerError),
}

/// Scripted action planner that counts every call
#[derive(Debug, Default)]
pub struct MockPlanner {
    plans: HashMap<String, MockReply>,
    acts: HashMap<String, MockReply>,
    assertions: Option<Result<String, PlannerError>>,
    observations: HashMap<String, Vec<ObservedMatch>>,
    plan_calls: AtomicUsize,
    act_calls: AtomicUsize,
    observe_calls: AtomicUsize,
    assertion_calls: AtomicUsize,
}

impl MockPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_plan(mut self, instruction: &str, reply: MockReply) -> Self {
        self.plans.insert(instruction.to_string(), reply);
        self
    }

    pub fn on_act(mut self, instruction: &str, reply: MockReply) -> Self {
        self.acts.insert(instruction.to_string(), reply);
        self
    }

    /// Raw model text returned for every assertion-planning call
    pub fn assertion_reply(mut self, text: impl Into<String>) -> Self {
        self.assertions = Some(Ok(text.into()));
        self
    }

    pub fn assertion_error(mut self, error: PlannerError) -> Self {
        self.assertions = Some(Err(error));
        self
    }

    /// Fixed matches for an observation query, bypassing outline search
    pub fn observe_reply(mut self, query: &str, matches: Vec<ObservedMatch>) -> Self {
        self.observations.insert(query.to_string(), matches);
        self
    }

    pub fn plan_calls(&self) -> usize {
        self.plan_calls.load(Ordering::SeqCst)
    }

    pub fn act_calls(&self) -> usize {
        self.act_calls.load(Ordering::SeqCst)
    }

    pub fn observe_calls(&self) -> usize {
        self.observe_calls.load(Ordering::SeqCst)
    }

    pub fn assertion_calls(&self) -> usize {
        self.assertion_calls.load(Ordering::SeqCst)
    }

    /// Every AI call of any kind
    pub fn total_calls(&self) -> usize {
        self.plan_calls() + self.act_calls() + self.observe_calls() + self.assertion_calls()
    }
}

#[async_trait]
impl ActionPlanner for MockPlanner {
    async fn plan(&self, instruction: &str, _page: &PageState) -> Result<Value, PlannerError> {
        self.plan_calls.fetch_add(1, Ordering::SeqCst);
        match self.plans.get(instruction) {
            Some(MockReply::Actions(value)) => Ok(value.clone()),
            Some(MockReply::Opaque { .. }) => Ok(Value::Array(Vec::new())),
            Some(MockReply::Fail(error)) => Err(error.clone()),
            None => Err(PlannerError::NoCandidates),
        }
    }

    async fn act(
        &self,
        instruction: &str,
        _page: &PageState,
        driver: &dyn BrowserDriver,
    ) -> Result<Value, PlannerError> {
        self.act_calls.fetch_add(1, Ordering::SeqCst);
        match self.acts.get(instruction) {
            Some(MockReply::Actions(value)) => Ok(value.clone()),
            Some(MockReply::Opaque { perform, success }) => {
                for action in perform {
                    if let Err(e) = execute_action(driver, action).await {
                        return Ok(json!({
                            "success": false,
                            "message": e.to_string(),
                            "action": instruction,
                        }));
                    }
                }
                Ok(json!({
                    "success": success,
                    "message": format!("performed {} action(s)", perform.len()),
                    "action": instruction,
                }))
            }
            Some(MockReply::Fail(error)) => Err(error.clone()),
            None => Ok(json!({
                "success": false,
                "message": format!("could not perform '{}'", instruction),
                "action": instruction,
            })),
        }
    }

    async fn observe(&self, query: &str, page: &PageState) -> Result<Vec<ObservedMatch>, PlannerError> {
        self.observe_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(matches) = self.observations.get(query) {
            return Ok(matches.clone());
        }
        let needle = query.to_lowercase();
        Ok(page
            .outline
            .lines()
            .filter(|line| line.to_lowercase().contains(&needle))
            .map(|line| ObservedMatch {
                selector: line.split_whitespace().next().unwrap_or("body").to_string(),
                description: line.to_string(),
            })
            .collect())
    }

    async fn plan_assertions(&self, _prompt: &str, _page: &PageState) -> Result<String, PlannerError> {
        self.assertion_calls.fetch_add(1, Ordering::SeqCst);
        match &self.assertions {
            Some(reply) => reply.clone(),
            None => Err(PlannerError::Malformed("no assertion plan scripted".to_string())),
        }
    }
}
