//! Saga error types.

use std::time::Duration;

use common::OrchestrationId;
use domain::{DomainError, ValidationError};
use record_store::StoreError;
use thiserror::Error;

/// Failure reported by a collaborator call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// The call may succeed if repeated.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The call will not succeed no matter how often it is repeated.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The remote resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// No answer arrived within the per-call timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The worker is shutting down.
    #[error("cancelled")]
    Cancelled,
}

impl CollaboratorError {
    /// Transient failures and timeouts are retried by default.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<serde_json::Error> for CollaboratorError {
    fn from(err: serde_json::Error) -> Self {
        CollaboratorError::Permanent(format!("malformed step data: {err}"))
    }
}

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No orchestration exists with this ID.
    #[error("Orchestration not found: {0}")]
    NotFound(OrchestrationId),

    /// The onboarding request failed validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] ValidationError),

    /// Record store error.
    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<DomainError> for SagaError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(e) => SagaError::InvalidRequest(e),
            DomainError::Serialization(e) => SagaError::Serialization(e),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
