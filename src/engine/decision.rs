//! Replay/plan decision.
//!
//! A step replays when the persisted history for its index is a usable cache
//! entry; otherwise it is planned. A cache entry is usable when:
//! - it succeeded and carries at least one action
//! - it was recorded for the same instruction text
//! - every earlier step in the history succeeded too

use crate::codec::{ActResult, ActionRecord};
use crate::model::StepPath;
use crate::store::PersistedCase;

/// What the engine will do for one step
#[derive(Debug, Clone, PartialEq)]
pub enum StepDecision {
    /// Execute these cached actions, no planner call
    Replay(Vec<ActionRecord>),
    /// Ask the planner
    Plan,
}

impl StepDecision {
    pub fn path(&self) -> StepPath {
        match self {
            StepDecision::Replay(_) => StepPath::Replay,
            StepDecision::Plan => StepPath::Plan,
        }
    }
}

/// Per-step history from the last persisted run
#[derive(Debug, Clone, Default)]
pub struct CaseHistory {
    steps: Vec<ActResult>,
}

impl CaseHistory {
    pub fn new(steps: Vec<ActResult>) -> Self {
        Self { steps }
    }

    pub fn from_persisted(persisted: Option<&PersistedCase>) -> Self {
        let steps = persisted
            .and_then(|p| p.result.as_ref())
            .map(|r| r.steps.clone())
            .unwrap_or_default();
        Self { steps }
    }

    pub fn step(&self, index: usize) -> Option<&ActResult> {
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Sticky wait-skip flag for a step index
    pub fn wait_timed_out(&self, index: usize) -> bool {
        self.step(index)
            .and_then(|s| s.page_load_wait_timed_out)
            .unwrap_or(false)
    }

    pub fn decide(&self, index: usize, instruction: &str) -> StepDecision {
        if self.steps.iter().take(index).any(|s| !s.success) {
            return StepDecision::Plan;
        }
        match self.step(index) {
            Some(cached)
                if cached.success
                    && !cached.actions.is_empty()
                    && cached.action_description == instruction =>
            {
                StepDecision::Replay(cached.actions.clone())
            }
            _ => StepDecision::Plan,
        }
    }
}
