use common::{OrchestrationId, OrchestrationState, ParseEnumError, StepKind, StepStatus};
use thiserror::Error;

/// Errors that can occur when interacting with the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No orchestration record exists with this ID.
    #[error("Orchestration not found: {0}")]
    NotFound(OrchestrationId),

    /// The caller's claim token no longer holds the record's lease.
    #[error("Claim lost for orchestration {0}")]
    ClaimLost(OrchestrationId),

    /// The record's current state did not match the transition's source state.
    #[error("State conflict for orchestration {id}: expected {expected}, found {actual}")]
    StateConflict {
        id: OrchestrationId,
        expected: OrchestrationState,
        actual: OrchestrationState,
    },

    /// The record is terminal and accepts no further transitions.
    #[error("Orchestration {id} is terminal ({state})")]
    TerminalState {
        id: OrchestrationId,
        state: OrchestrationState,
    },

    /// A second forward `completed` or `compensated` row for the same step.
    #[error("Duplicate {status} step record for {step} on orchestration {id}")]
    DuplicateStepRecord {
        id: OrchestrationId,
        step: StepKind,
        status: StepStatus,
    },

    /// A step record violates the row invariants.
    #[error("Invalid step record: {0}")]
    InvalidStepRecord(String),

    /// An insert lost an idempotency-key race and the winner could not be read back.
    #[error("Idempotency key conflict: {0}")]
    IdempotencyConflict(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted column held a value that does not decode.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<ParseEnumError> for StoreError {
    fn from(err: ParseEnumError) -> Self {
        StoreError::Decode(err.to_string())
    }
}

/// Result type for record store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
