//! Step Replay - natural-language browser tests with cached action replay.
//!
//! This crate provides:
//! - Action capture from live pages into replayable selector-addressed records
//! - A per-step decision between replaying cached actions and asking the planner
//! - A page-settle heuristic that learns which steps never go idle
//! - Assertion planning and verification with cached plans
//! - A JSON case store with field-level merge of each run
//! - A batched scheduler running cases in isolated browser sessions
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use step_replay::{CaseStore, ChatPlanner, PlaywrightConfig, PlaywrightFactory, RunContext, Scheduler};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = step_replay::config::get();
//! let store = Arc::new(CaseStore::open(&config.paths.store_dir)?);
//! let planner = Arc::new(ChatPlanner::new(config.planner.clone())?);
//! let factory = Arc::new(PlaywrightFactory::new(PlaywrightConfig::default()));
//! let cases: Vec<_> = store.load_all()?.into_iter().map(|doc| doc.case).collect();
//!
//! let report = Scheduler::new(factory, store, RunContext::new(planner, config))
//!     .run(&cases)
//!     .await;
//! println!("{} passed, {} failed", report.passed(), report.failed());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod assertion;
pub mod capture;
pub mod codec;
pub mod config;
pub mod driver;
pub mod engine;
pub mod model;
pub mod provider;
pub mod scheduler;
pub mod session;
pub mod shutdown;
pub mod store;

// Re-export the data model and codec
pub use codec::{ActResult, ActionMethod, ActionRecord};
pub use model::{CaseLog, CaseStatus, StepPath, StepResult, StepStatus, TestCase, TestResult};

// Re-export collaborators
pub use driver::{
    ActionPlanner, BrowserDriver, BrowserFactory, MockBrowser, MockBrowserFactory, MockPage,
    MockPlanner, PlaywrightConfig, PlaywrightDriver, PlaywrightFactory, SchemaValidator,
};
pub use provider::{ChatPlanner, ProviderError, ProviderResult};

// Re-export the engine
pub use capture::CaptureContext;
pub use engine::{CaseOutcome, EngineError, EngineResult, RunContext, StepDecision, run_case};
pub use scheduler::{ScheduleReport, Scheduler};

// Re-export persistence and run artifacts
pub use api::ShapeValidator;
pub use session::Session;
pub use shutdown::{ShutdownSignal, ShutdownTrigger};
pub use store::{CaseStore, PersistedCase, PersistedResult, StoreError, StoreResult};
