//! Runs one step with retries and a per-call timeout.

use std::sync::Arc;
use std::time::Duration;

use common::{Direction, StepKind};
use record_store::OrchestrationRecord;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::compensation::CompensationRegistry;
use crate::error::CollaboratorError;
use crate::retry::{RetryPolicy, RetryPredicate, default_predicate, retry};
use crate::services::{StepInput, StepRegistry};

/// Terminal result of a step after its retry budget.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded { output: Value, attempts: u32 },
    Failed { error: CollaboratorError, attempts: u32 },
}

impl StepOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            StepOutcome::Succeeded { attempts, .. } | StepOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded { .. })
    }

    /// True if the step was abandoned because the worker is shutting down.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            StepOutcome::Failed {
                error: CollaboratorError::Cancelled,
                ..
            }
        )
    }
}

/// Executes forward and compensation actions. Holds no per-orchestration state.
#[derive(Clone)]
pub struct StepExecutor {
    registry: Arc<StepRegistry>,
    compensations: Arc<CompensationRegistry>,
    forward_policy: RetryPolicy,
    compensation_policy: RetryPolicy,
    predicate: RetryPredicate,
    call_timeout: Duration,
}

impl StepExecutor {
    /// Creates an executor with default policies and a 10 s call timeout.
    pub fn new(registry: StepRegistry) -> Self {
        let compensations = CompensationRegistry::from_steps(&registry);
        Self {
            registry: Arc::new(registry),
            compensations: Arc::new(compensations),
            forward_policy: RetryPolicy::default(),
            compensation_policy: RetryPolicy::for_compensation(),
            predicate: default_predicate(),
            call_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_forward_policy(mut self, policy: RetryPolicy) -> Self {
        self.forward_policy = policy;
        self
    }

    pub fn with_compensation_policy(mut self, policy: RetryPolicy) -> Self {
        self.compensation_policy = policy;
        self
    }

    pub fn with_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Runs the forward action of `step` against `record`.
    pub async fn execute(
        &self,
        step: StepKind,
        record: &OrchestrationRecord,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        let Some(action) = self.registry.get(step) else {
            return StepOutcome::Failed {
                error: CollaboratorError::Permanent(format!("no step registered for {step}")),
                attempts: 0,
            };
        };
        let input = match StepInput::from_record(record) {
            Ok(input) => input,
            Err(error) => return StepOutcome::Failed { error, attempts: 0 },
        };

        let outcome = retry(&self.forward_policy, &self.predicate, cancel, |attempt| {
            let action = Arc::clone(&action);
            let input = &input;
            async move {
                tracing::debug!(%step, attempt, "invoking forward action");
                self.bounded(action.perform_forward(input)).await
            }
        })
        .await;

        Self::into_outcome(outcome.result, outcome.attempts)
    }

    /// Runs the compensation of `step` against `record`.
    pub async fn compensate(
        &self,
        step: StepKind,
        record: &OrchestrationRecord,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        let input = match StepInput::from_record(record) {
            Ok(input) => input,
            Err(error) => return StepOutcome::Failed { error, attempts: 0 },
        };

        let outcome = retry(
            &self.compensation_policy,
            &self.predicate,
            cancel,
            |attempt| {
                let input = &input;
                async move {
                    tracing::debug!(%step, attempt, "invoking compensation");
                    self.bounded(self.compensations.compensate(step, input))
                        .await
                }
            },
        )
        .await;

        Self::into_outcome(outcome.result, outcome.attempts)
    }

    /// Runs `step` in `direction`.
    pub async fn run(
        &self,
        step: StepKind,
        direction: Direction,
        record: &OrchestrationRecord,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        match direction {
            Direction::Forward => self.execute(step, record, cancel).await,
            Direction::Compensation => self.compensate(step, record, cancel).await,
        }
    }

    async fn bounded<F>(&self, call: F) -> Result<Value, CollaboratorError>
    where
        F: std::future::Future<Output = Result<Value, CollaboratorError>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout(self.call_timeout)),
        }
    }

    fn into_outcome(result: Result<Value, CollaboratorError>, attempts: u32) -> StepOutcome {
        match result {
            Ok(output) => StepOutcome::Succeeded { output, attempts },
            Err(error) => StepOutcome::Failed { error, attempts },
        }
    }
}
