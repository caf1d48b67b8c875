//! Disaster recovery client and the replication step.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::StepKind;
use domain::DisasterRecoverySpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use super::{FaultInjector, ResourceHandle, SagaStep, StepInput};
use crate::error::CollaboratorError;

/// Reference to a configured replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationHandle {
    pub replication_id: String,
    pub resource_id: String,
    pub secondary_region: String,
    pub rpo_minutes: u32,
}

/// Configures cross-region replication. Idempotent per resource.
#[async_trait]
pub trait DisasterRecoveryClient: Send + Sync {
    async fn configure_replication(
        &self,
        spec: &DisasterRecoverySpec,
        resource: &ResourceHandle,
    ) -> Result<ReplicationHandle, CollaboratorError>;

    async fn teardown_replication(
        &self,
        handle: &ReplicationHandle,
    ) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Default)]
struct ReplicationState {
    // keyed by resource_id
    replications: HashMap<String, ReplicationHandle>,
    next_id: u32,
}

/// In-memory disaster recovery service for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDisasterRecovery {
    state: Arc<Mutex<ReplicationState>>,
    faults: FaultInjector,
}

impl InMemoryDisasterRecovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub async fn replication_count(&self) -> usize {
        self.state.lock().await.replications.len()
    }
}

#[async_trait]
impl DisasterRecoveryClient for InMemoryDisasterRecovery {
    async fn configure_replication(
        &self,
        spec: &DisasterRecoverySpec,
        resource: &ResourceHandle,
    ) -> Result<ReplicationHandle, CollaboratorError> {
        self.faults.before_forward("disaster recovery").await?;

        if spec.secondary_region.as_str() == resource.region {
            return Err(CollaboratorError::Permanent(format!(
                "secondary region {} equals primary",
                spec.secondary_region
            )));
        }

        let mut state = self.state.lock().await;
        if let Some(existing) = state.replications.get(&resource.resource_id) {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let handle = ReplicationHandle {
            replication_id: format!("REP-{:04}", state.next_id),
            resource_id: resource.resource_id.clone(),
            secondary_region: spec.secondary_region.as_str().to_string(),
            rpo_minutes: spec.rpo_minutes,
        };
        state
            .replications
            .insert(resource.resource_id.clone(), handle.clone());
        Ok(handle)
    }

    async fn teardown_replication(
        &self,
        handle: &ReplicationHandle,
    ) -> Result<(), CollaboratorError> {
        self.faults.before_compensation("disaster recovery").await?;

        let mut state = self.state.lock().await;
        state
            .replications
            .remove(&handle.resource_id)
            .map(|_| ())
            .ok_or_else(|| CollaboratorError::NotFound(handle.replication_id.clone()))
    }
}

/// Configures replication of the tenant's resources to the secondary region.
pub struct DisasterRecoveryStep<C> {
    client: C,
}

impl<C: DisasterRecoveryClient> DisasterRecoveryStep<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: DisasterRecoveryClient> SagaStep for DisasterRecoveryStep<C> {
    fn kind(&self) -> StepKind {
        StepKind::DisasterRecovery
    }

    async fn perform_forward(&self, input: &StepInput) -> Result<Value, CollaboratorError> {
        let resource: ResourceHandle = input.handle(StepKind::Provisioning)?;
        let handle = self
            .client
            .configure_replication(&input.request.disaster_recovery, &resource)
            .await?;
        Ok(serde_json::to_value(handle)?)
    }

    async fn perform_compensation(&self, input: &StepInput) -> Result<Value, CollaboratorError> {
        let handle: ReplicationHandle = input.handle(StepKind::DisasterRecovery)?;
        self.client.teardown_replication(&handle).await?;
        Ok(serde_json::json!({ "torn_down": handle.replication_id }))
    }
}
