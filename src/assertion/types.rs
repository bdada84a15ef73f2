// Assertion plan types and errors

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::driver::PlannerError;

/// Result type for assertion operations
pub type AssertionResult<T> = Result<T, AssertionError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssertionError {
    #[error("assertion plan malformed: {0}")]
    Malformed(String),

    #[error("assertion plan invalid: {0}")]
    Invalid(String),

    #[error("expected URL to contain '{expected}', but it was '{actual}'")]
    UrlMismatch { expected: String, actual: String },

    #[error("nothing on the page matches '{0}'")]
    NoMatches(String),

    #[error("expected text not found on page: '{0}'")]
    TextMissing(String),

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error("browser error during verification: {0}")]
    Driver(String),
}

/// One check in an assertion plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AssertionPlanItem {
    /// Current URL must contain `value`
    Url { value: String },
    /// Delegated to the observation capability; at least one match required
    Observation { text: String },
}

impl AssertionPlanItem {
    pub fn describe(&self) -> String {
        match self {
            AssertionPlanItem::Url { value } => format!("url contains '{}'", value),
            AssertionPlanItem::Observation { text } => format!("observe '{}'", text),
        }
    }
}

/// Structured, cacheable verification of an expected result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionPlan {
    #[serde(default)]
    pub summary: String,
    #[serde(alias = "items")]
    pub assertions: Vec<AssertionPlanItem>,
    /// Expected-result text the plan was built for; a cached plan only
    /// applies while the case still expects the same thing
    #[serde(
        default,
        rename = "expectedResult",
        skip_serializing_if = "Option::is_none"
    )]
    pub expected_result: Option<String>,
}

impl AssertionPlan {
    /// Decode and schema-check a plan, e.g. one loaded from the store
    pub fn from_value(value: &Value) -> AssertionResult<Self> {
        let plan: AssertionPlan = serde_json::from_value(value.clone())
            .map_err(|e| AssertionError::Invalid(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> AssertionResult<()> {
        if self.assertions.is_empty() {
            return Err(AssertionError::Invalid("plan has no assertions".to_string()));
        }
        for (i, item) in self.assertions.iter().enumerate() {
            let empty = match item {
                AssertionPlanItem::Url { value } => value.trim().is_empty(),
                AssertionPlanItem::Observation { text } => text.trim().is_empty(),
            };
            if empty {
                return Err(AssertionError::Invalid(format!("assertion {} is empty", i + 1)));
            }
        }
        Ok(())
    }

    /// Whether this plan was built for `expected`
    pub fn built_for(&self, expected: &str) -> bool {
        self.expected_result
            .as_deref()
            .is_some_and(|source| source.trim() == expected.trim())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
