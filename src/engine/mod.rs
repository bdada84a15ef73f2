//! Per-case execution engine.
//!
//! - `decision`: replay vs plan per step, from persisted history
//! - `executor`: selector-addressed execution and the opaque fallback
//! - `settle`: bounded post-step wait with sticky skip
//! - `case_runner`: navigation, steps, verification and result assembly

pub mod case_runner;
pub mod decision;
pub mod executor;
pub mod settle;

use std::time::Duration;
use thiserror::Error;

use crate::driver::{DriverError, PlannerError};

pub use case_runner::{CaseOutcome, RunContext, run_case};
pub use decision::{CaseHistory, StepDecision};
pub use executor::{StepContext, StepExecution, execute_action, execute_actions, execute_step};
pub use settle::{SettleRecord, settle_after_step};

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Case-fatal failures
#[derive(Debug, Error)]
pub enum EngineError {
    /// A cached selector no longer resolves
    #[error("replay failed: {0}")]
    Replay(String),

    #[error("action failed: {0}")]
    Action(String),

    #[error("direct execution failed: {0}")]
    Opaque(String),

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error("navigation to {url} timed out after {attempts} attempt(s) ({timeout:?} each)")]
    NavigationTimeout {
        url: String,
        attempts: usize,
        timeout: Duration,
    },

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("API validation failed: {0}")]
    Api(String),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("interrupted")]
    Interrupted,
}
