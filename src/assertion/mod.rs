pub mod planner;
pub mod types;
pub mod verifier;

pub use planner::{build_prompt, extract_json, parse_plan, plan_assertions};
pub use types::{AssertionError, AssertionPlan, AssertionPlanItem, AssertionResult};
pub use verifier::{VerifyOutcome, execute_plan, verify_expected};
