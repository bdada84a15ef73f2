//! Bounded-concurrency case scheduler.
//!
//! Cases run in fixed-size batches: up to `concurrency` cases start together,
//! the batch is awaited as a whole, then the next batch starts. Each case gets
//! its own browser session, which is closed whatever the outcome. The store
//! is the only shared resource and is written once per case, after the case
//! has finished, through load-merge-save.

use chrono::Utc;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::driver::BrowserFactory;
use crate::engine::{CaseOutcome, RunContext, run_case};
use crate::model::{CaseStatus, TestCase, TestResult};
use crate::store::CaseStore;

/// Summary of a scheduled run
#[derive(Debug, Default)]
pub struct ScheduleReport {
    /// Size of each batch, in order
    pub batches: Vec<usize>,
    /// One outcome per case that started, in input order within each batch
    pub outcomes: Vec<CaseOutcome>,
    /// Cases never started because shutdown was requested
    pub skipped: Vec<String>,
}

impl ScheduleReport {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0 && self.skipped.is_empty()
    }
}

pub struct Scheduler {
    factory: Arc<dyn BrowserFactory>,
    store: Arc<CaseStore>,
    ctx: RunContext,
    record_api: bool,
}

impl Scheduler {
    pub fn new(factory: Arc<dyn BrowserFactory>, store: Arc<CaseStore>, ctx: RunContext) -> Self {
        Self {
            factory,
            store,
            ctx,
            record_api: false,
        }
    }

    /// API recording serializes cases so recorded shapes are not interleaved
    pub fn record_api(mut self, record_api: bool) -> Self {
        self.record_api = record_api;
        self
    }

    pub fn batch_size(&self) -> usize {
        if self.record_api {
            1
        } else {
            self.ctx.run.concurrency.max(1)
        }
    }

    pub async fn run(&self, cases: &[TestCase]) -> ScheduleReport {
        let size = self.batch_size();
        let mut report = ScheduleReport::default();
        tracing::info!("running {} case(s), {} at a time", cases.len(), size);

        for batch in cases.chunks(size) {
            if self.ctx.shutdown.is_triggered() {
                report.skipped.extend(batch.iter().map(|c| c.id.clone()));
                continue;
            }
            tracing::debug!("starting batch {} ({} case(s))", report.batches.len() + 1, batch.len());
            report.batches.push(batch.len());
            let outcomes = join_all(batch.iter().map(|case| self.run_one(case))).await;
            report.outcomes.extend(outcomes);
        }

        if !report.skipped.is_empty() {
            tracing::warn!("interrupted: {} case(s) not started", report.skipped.len());
        }
        tracing::info!("{} passed, {} failed", report.passed(), report.failed());
        report
    }

    async fn run_one(&self, case: &TestCase) -> CaseOutcome {
        let prior = match self.store.load(&case.id) {
            Ok(prior) => prior,
            Err(e) => {
                tracing::warn!("ignoring unreadable history for {}: {}", case.id, e);
                None
            }
        };

        let outcome = match self.factory.launch(&case.id).await {
            Ok(driver) => {
                let outcome = run_case(Arc::clone(&driver), case, prior.as_ref(), &self.ctx).await;
                if let Err(e) = driver.close().await {
                    tracing::warn!("failed to close browser for {}: {}", case.id, e);
                }
                outcome
            }
            Err(e) => {
                tracing::error!("could not launch browser for {}: {}", case.id, e);
                launch_failure(case, &e.to_string())
            }
        };

        if let Err(e) = self
            .store
            .load_merge_save(case, &outcome.result, &outcome.api_records)
        {
            tracing::error!("failed to save result for {}: {}", case.id, e);
        }
        outcome
    }
}

fn launch_failure(case: &TestCase, error: &str) -> CaseOutcome {
    let now = Utc::now();
    let message = format!("browser launch failed: {}", error);
    CaseOutcome {
        result: TestResult {
            id: case.id.clone(),
            status: CaseStatus::Failed,
            steps: Vec::new(),
            actual_result: message.clone(),
            error: Some(message.clone()),
            start_time: now,
            end_time: now,
            duration_ms: 0,
            assertion_plan: None,
            assertions_ran: false,
            trace_path: None,
            log: Some(message),
        },
        api_records: BTreeMap::new(),
    }
}
