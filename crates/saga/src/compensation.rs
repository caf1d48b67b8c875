//! Inverse operations for completed forward steps.

use std::collections::HashMap;
use std::sync::Arc;

use common::StepKind;
use serde_json::Value;

use crate::error::CollaboratorError;
use crate::services::{SagaStep, StepInput, StepRegistry};

/// Maps each forward step to the action that undoes it.
///
/// A collaborator reporting the resource as already gone counts as a
/// successful compensation.
#[derive(Clone, Default)]
pub struct CompensationRegistry {
    inverses: HashMap<StepKind, Arc<dyn SagaStep>>,
}

impl CompensationRegistry {
    /// Builds the registry from the steps' own compensation actions.
    pub fn from_steps(steps: &StepRegistry) -> Self {
        let inverses = steps
            .kinds()
            .filter_map(|kind| steps.get(kind).map(|step| (kind, step)))
            .collect();
        Self { inverses }
    }

    pub fn has(&self, kind: StepKind) -> bool {
        self.inverses.contains_key(&kind)
    }

    /// Runs the inverse of `kind` once.
    pub async fn compensate(
        &self,
        kind: StepKind,
        input: &StepInput,
    ) -> Result<Value, CollaboratorError> {
        let step = self.inverses.get(&kind).ok_or_else(|| {
            CollaboratorError::Permanent(format!("no compensation registered for {kind}"))
        })?;

        match step.perform_compensation(input).await {
            Err(CollaboratorError::NotFound(what)) => {
                tracing::info!(step = %kind, %what, "resource already absent, compensation is a no-op");
                Ok(serde_json::json!({ "already_absent": true }))
            }
            other => other,
        }
    }
}
