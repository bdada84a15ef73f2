//! Step execution.
//!
//! Replay and planned candidates run through the same selector-addressed
//! executor. When the planner has nothing actionable the step falls back to
//! opaque execution, and the actions it performed are taken from its own
//! report or, failing that, from capture.

use crate::capture::CaptureContext;
use crate::codec::{ActionMethod, ActionRecord, PlannerOutput, normalize_act_result, normalize_planner_output};
use crate::driver::{ActionPlanner, BrowserDriver, DriverError, DriverResult};
use crate::model::{CaseLog, StepPath};

use super::decision::StepDecision;
use super::EngineError;

/// Execute one action against the driver
pub async fn execute_action(driver: &dyn BrowserDriver, action: &ActionRecord) -> DriverResult<()> {
    let selector = action.selector.as_str();
    let first = action.arguments.first().map(String::as_str).unwrap_or_default();
    match action.method {
        ActionMethod::Click => driver.click(selector).await,
        ActionMethod::Fill => driver.fill(selector, first).await,
        ActionMethod::Type => driver.type_text(selector, first).await,
        ActionMethod::Select => driver.select_option(selector, first).await,
        ActionMethod::Check => driver.set_checked(selector, true).await,
        ActionMethod::Uncheck => driver.set_checked(selector, false).await,
        ActionMethod::Hover => driver.hover(selector).await,
        ActionMethod::Press => {
            if first.is_empty() {
                return Err(DriverError::Browser(format!("press on {} has no key", selector)));
            }
            driver.press(selector, first).await
        }
    }
}

/// Execute actions in order, stopping at the first failure. The error
/// carries the index of the failing action.
pub async fn execute_actions(
    driver: &dyn BrowserDriver,
    actions: &[ActionRecord],
    log: &mut CaseLog,
) -> Result<(), (usize, DriverError)> {
    for (i, action) in actions.iter().enumerate() {
        log.push(format!("  action {}: {}", i + 1, action.summary()));
        execute_action(driver, action).await.map_err(|e| (i, e))?;
    }
    Ok(())
}

/// Collaborators a step executes against
pub struct StepContext<'a> {
    pub driver: &'a dyn BrowserDriver,
    pub planner: &'a dyn ActionPlanner,
    pub capture: &'a CaptureContext,
}

/// What one step did, regardless of path
#[derive(Debug)]
pub struct StepExecution {
    pub path: StepPath,
    pub actions: Vec<ActionRecord>,
    pub message: String,
    pub error: Option<EngineError>,
}

impl StepExecution {
    fn ok(path: StepPath, actions: Vec<ActionRecord>, message: impl Into<String>) -> Self {
        Self {
            path,
            actions,
            message: message.into(),
            error: None,
        }
    }

    fn failed(path: StepPath, actions: Vec<ActionRecord>, error: EngineError) -> Self {
        Self {
            path,
            actions,
            message: String::new(),
            error: Some(error),
        }
    }
}

pub async fn execute_step(
    ctx: &StepContext<'_>,
    instruction: &str,
    decision: StepDecision,
    log: &mut CaseLog,
) -> StepExecution {
    let execution = match decision {
        StepDecision::Replay(actions) => replay(ctx, actions, log).await,
        StepDecision::Plan => plan(ctx, instruction, log).await,
    };

    // Step boundary for capture. Whatever the opaque path did not claim is
    // already part of `execution`; leftovers only go to the log.
    let leftover = ctx.capture.drain().await;
    if !leftover.is_empty() {
        log.push(format!("capture: {} interaction(s) observed", leftover.len()));
    }
    execution
}

async fn replay(ctx: &StepContext<'_>, actions: Vec<ActionRecord>, log: &mut CaseLog) -> StepExecution {
    log.push(format!("replaying {} cached action(s)", actions.len()));
    match execute_actions(ctx.driver, &actions, log).await {
        Ok(()) => {
            let message = format!("replayed {} action(s)", actions.len());
            StepExecution::ok(StepPath::Replay, actions, message)
        }
        Err((i, e)) => {
            let error = EngineError::Replay(format!(
                "cached action {} ({}) failed: {}",
                i + 1,
                actions[i].summary(),
                e
            ));
            StepExecution::failed(StepPath::Replay, actions, error)
        }
    }
}

async fn plan(ctx: &StepContext<'_>, instruction: &str, log: &mut CaseLog) -> StepExecution {
    let page = match ctx.driver.page_state().await {
        Ok(page) => page,
        Err(e) => return StepExecution::failed(StepPath::Plan, Vec::new(), EngineError::Driver(e)),
    };

    match ctx.planner.plan(instruction, &page).await {
        Ok(raw) => match normalize_planner_output(&raw) {
            PlannerOutput::Actions(actions) if !actions.is_empty() => {
                log.push(format!("planner proposed {} action(s)", actions.len()));
                return match execute_actions(ctx.driver, &actions, log).await {
                    Ok(()) => {
                        let message = format!("executed {} planned action(s)", actions.len());
                        StepExecution::ok(StepPath::Plan, actions, message)
                    }
                    Err((i, e)) => {
                        let error = EngineError::Action(format!(
                            "planned action {} ({}) failed: {}",
                            i + 1,
                            actions[i].summary(),
                            e
                        ));
                        StepExecution::failed(StepPath::Plan, actions, error)
                    }
                };
            }
            PlannerOutput::Actions(_) => log.push("planner returned no candidates, executing directly"),
            PlannerOutput::Opaque(_) => log.push("planner output not actionable, executing directly"),
        },
        Err(e) if e.is_auth() => {
            return StepExecution::failed(StepPath::Plan, Vec::new(), EngineError::Planner(e));
        }
        Err(e) => {
            tracing::warn!("planner failed for '{}': {}", instruction, e);
            log.push(format!("planner failed ({}), executing directly", e));
        }
    }

    opaque(ctx, instruction, &page, log).await
}

async fn opaque(
    ctx: &StepContext<'_>,
    instruction: &str,
    page: &crate::driver::PageState,
    log: &mut CaseLog,
) -> StepExecution {
    let raw = match ctx.planner.act(instruction, page, ctx.driver).await {
        Ok(raw) => raw,
        Err(e) => return StepExecution::failed(StepPath::Plan, Vec::new(), EngineError::Planner(e)),
    };
    let result = normalize_act_result(&raw, instruction);
    let captured = ctx.capture.drain().await;
    let actions = if result.actions.is_empty() {
        captured
    } else {
        result.actions
    };
    log.push(format!(
        "direct execution {}: {} ({} action(s) recorded)",
        if result.success { "succeeded" } else { "failed" },
        result.message,
        actions.len()
    ));

    if result.success {
        StepExecution::ok(StepPath::Plan, actions, result.message)
    } else {
        let message = if result.message.is_empty() {
            format!("could not perform '{}'", instruction)
        } else {
            result.message
        };
        StepExecution::failed(StepPath::Plan, actions, EngineError::Opaque(message))
    }
}
