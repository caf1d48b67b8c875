//! Shared types for the onboarding orchestrator.

pub mod state;
pub mod step;
pub mod types;

use thiserror::Error;

pub use state::OrchestrationState;
pub use step::{Direction, StepKind, StepStatus};
pub use types::{OrchestrationId, WorkflowType};

/// Returned when a persisted enum value does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}
