//! Trigger intake: turns onboarding requests into durable orchestrations.

use std::sync::Arc;

use common::{OrchestrationId, OrchestrationState, WorkflowType};
use domain::OnboardingRequest;
use record_store::{CreateOutcome, OrchestrationRecord, RecordStore};
use serde::Serialize;
use tokio_util::task::TaskTracker;

use crate::engine::SagaEngine;
use crate::error::Result;

/// Answer to an intake call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntakeReceipt {
    pub orchestration_id: OrchestrationId,
    pub state: OrchestrationState,
    /// True if the trigger matched an existing orchestration.
    pub duplicate: bool,
}

/// Accepts triggers and dispatches new orchestrations in the background.
pub struct Dispatcher<S: RecordStore> {
    engine: Arc<SagaEngine<S>>,
    tasks: TaskTracker,
}

impl<S: RecordStore> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            tasks: self.tasks.clone(),
        }
    }
}

impl<S: RecordStore + 'static> Dispatcher<S> {
    pub fn new(engine: Arc<SagaEngine<S>>) -> Self {
        Self {
            engine,
            tasks: TaskTracker::new(),
        }
    }

    pub fn engine(&self) -> &Arc<SagaEngine<S>> {
        &self.engine
    }

    /// Validates and records a trigger, then dispatches it if it is new.
    ///
    /// Uniqueness is always keyed on the tenant, so a tenant is onboarded at
    /// most once whatever `delivery_key` the caller sends. The delivery key
    /// is only stored on the record it creates.
    #[tracing::instrument(skip(self, request), fields(tenant_id = %request.tenant.tenant_id))]
    pub async fn intake(
        &self,
        request: OnboardingRequest,
        delivery_key: Option<String>,
    ) -> Result<IntakeReceipt> {
        let (key, payload) = request.into_payload()?;
        let delivery_key = delivery_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        let record = OrchestrationRecord::new(WorkflowType::CustomerOnboarding, key, payload)
            .with_delivery_key(delivery_key.clone());
        match self.engine.store().create_if_absent(record).await? {
            CreateOutcome::Created(record) => {
                metrics::counter!("saga_intake_total", "result" => "created").increment(1);
                tracing::info!(orchestration_id = %record.id, "onboarding accepted");
                self.spawn_dispatch(record.id);
                Ok(IntakeReceipt {
                    orchestration_id: record.id,
                    state: record.state,
                    duplicate: false,
                })
            }
            CreateOutcome::Existing(record) => {
                metrics::counter!("saga_intake_total", "result" => "duplicate").increment(1);
                tracing::info!(
                    orchestration_id = %record.id,
                    state = %record.state,
                    delivery_key = delivery_key.as_deref().unwrap_or_default(),
                    original_delivery_key = record.delivery_key.as_deref().unwrap_or_default(),
                    "duplicate trigger suppressed"
                );
                Ok(IntakeReceipt {
                    orchestration_id: record.id,
                    state: record.state,
                    duplicate: true,
                })
            }
        }
    }

    /// Dispatches an existing orchestration in the background.
    pub async fn redispatch(&self, id: OrchestrationId) -> Result<OrchestrationRecord> {
        let record = self.engine.get(id).await?;
        if !record.state.is_terminal() {
            self.spawn_dispatch(id);
        }
        Ok(record)
    }

    fn spawn_dispatch(&self, id: OrchestrationId) {
        let engine = Arc::clone(&self.engine);
        self.tasks.spawn(async move {
            match engine.dispatch(id).await {
                Ok(outcome) => tracing::debug!(orchestration_id = %id, ?outcome, "dispatch finished"),
                Err(e) => tracing::error!(orchestration_id = %id, error = %e, "dispatch failed"),
            }
        });
    }

    /// Number of background dispatches still running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for every background dispatch started so far.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}
