// Persisted per-case document and store errors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::codec::ActResult;
use crate::model::{CaseStatus, TestCase, TestResult};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid case document {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize case {id}: {source}")]
    Serialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("case {0} already exists")]
    AlreadyExists(String),

    #[error("case {0} not found")]
    NotFound(String),
}

/// Result section of a persisted case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedResult {
    pub status: CaseStatus,
    #[serde(default)]
    pub steps: Vec<ActResult>,
    #[serde(default)]
    pub actual_result: String,
    #[serde(default)]
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Milliseconds
    #[serde(default)]
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion_plan: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

impl PersistedResult {
    /// Wire form of one run, before merging with history
    pub fn from_run(run: &TestResult) -> Self {
        Self {
            status: run.status,
            steps: run.steps.iter().map(|s| s.to_act_result()).collect(),
            actual_result: run.actual_result.clone(),
            error: run.error.clone(),
            start_time: run.start_time,
            end_time: run.end_time,
            duration: run.duration_ms,
            assertion_plan: run.assertion_plan.as_ref().map(|p| p.to_value()),
            trace_path: run
                .trace_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            log: run.log.clone(),
        }
    }
}

/// One case document: definition, recorded API shapes and the last result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedCase {
    #[serde(flatten)]
    pub case: TestCase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_records: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<PersistedResult>,
}

impl PersistedCase {
    pub fn new(case: TestCase) -> Self {
        Self {
            case,
            api_records: None,
            result: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.case.id
    }
}
