pub mod backend;
pub mod mock;
pub mod playwright;
pub mod types;

pub use backend::{ActionPlanner, BrowserDriver, BrowserFactory, SchemaValidator};
pub use mock::{
    MockBrowser, MockBrowserFactory, MockElement, MockPage, MockPlanner, MockReply, SessionCounters,
};
pub use playwright::{Browser, PlaywrightConfig, PlaywrightDriver, PlaywrightFactory};
pub use types::{
    CapturedRequest, DriverError, DriverResult, ObservedMatch, PageState, PlannerError,
    SettleOutcome, Validation, WaitPolicy,
};
