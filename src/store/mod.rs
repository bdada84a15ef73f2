pub mod case_store;
pub mod merge;
pub mod types;

pub use case_store::CaseStore;
pub use merge::{merge_api_records, merge_case, merge_result, merge_steps};
pub use types::{PersistedCase, PersistedResult, StoreError, StoreResult};
