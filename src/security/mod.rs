/// Security Validation Pipeline and its check helpers
pub mod browser;
pub mod country;
pub mod pipeline;

pub use pipeline::{AccessContext, SecurityPipeline, ValidationOutcome};
