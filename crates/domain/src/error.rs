//! Domain error types.

use thiserror::Error;

use crate::onboarding::ValidationError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The onboarding request is malformed.
    #[error("Invalid onboarding request: {0}")]
    Validation(#[from] ValidationError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
