pub mod context;
pub mod processor;
pub mod script;
pub mod selector;
pub mod types;

pub use context::CaptureContext;
pub use processor::CaptureProcessor;
pub use script::{drain_script, is_drain_script};
pub use selector::derive_selector;
pub use types::{
    CaptureError, CaptureResult, DrainResponse, PathSegment, RawCaptureEvent, RawElement,
    RawEventKind,
};
