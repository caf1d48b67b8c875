//! Resource provisioning client and the provisioning step.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::StepKind;
use domain::ProvisioningSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use super::{FaultInjector, SagaStep, StepInput, TenantHandle};
use crate::error::CollaboratorError;

/// Reference to the primary resources allocated for a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub resource_id: String,
    pub tenant_ref: String,
    pub region: String,
}

/// Allocates tenant resources. `provision` must be idempotent per tenant.
#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    async fn provision(
        &self,
        spec: &ProvisioningSpec,
        tenant: &TenantHandle,
    ) -> Result<ResourceHandle, CollaboratorError>;

    async fn deprovision(&self, handle: &ResourceHandle) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Default)]
struct ProvisionerState {
    // keyed by tenant_ref
    resources: HashMap<String, ResourceHandle>,
    next_id: u32,
}

/// In-memory provisioner for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvisioner {
    state: Arc<Mutex<ProvisionerState>>,
    faults: FaultInjector,
}

impl InMemoryProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Returns the number of live resources.
    pub async fn resource_count(&self) -> usize {
        self.state.lock().await.resources.len()
    }

    /// Drops every resource behind the saga's back.
    pub async fn purge(&self) {
        self.state.lock().await.resources.clear();
    }
}

#[async_trait]
impl ProvisioningClient for InMemoryProvisioner {
    async fn provision(
        &self,
        spec: &ProvisioningSpec,
        tenant: &TenantHandle,
    ) -> Result<ResourceHandle, CollaboratorError> {
        self.faults.before_forward("provisioner").await?;

        let mut state = self.state.lock().await;
        if let Some(existing) = state.resources.get(&tenant.tenant_ref) {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let handle = ResourceHandle {
            resource_id: format!("RES-{:04}", state.next_id),
            tenant_ref: tenant.tenant_ref.clone(),
            region: spec.region.as_str().to_string(),
        };
        state
            .resources
            .insert(tenant.tenant_ref.clone(), handle.clone());
        Ok(handle)
    }

    async fn deprovision(&self, handle: &ResourceHandle) -> Result<(), CollaboratorError> {
        self.faults.before_compensation("provisioner").await?;

        let mut state = self.state.lock().await;
        match state.resources.get(&handle.tenant_ref) {
            Some(existing) if existing.resource_id == handle.resource_id => {
                state.resources.remove(&handle.tenant_ref);
                Ok(())
            }
            _ => Err(CollaboratorError::NotFound(handle.resource_id.clone())),
        }
    }
}

/// Allocates the tenant's primary resources.
pub struct ProvisioningStep<C> {
    client: C,
}

impl<C: ProvisioningClient> ProvisioningStep<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: ProvisioningClient> SagaStep for ProvisioningStep<C> {
    fn kind(&self) -> StepKind {
        StepKind::Provisioning
    }

    async fn perform_forward(&self, input: &StepInput) -> Result<Value, CollaboratorError> {
        let tenant: TenantHandle = input.handle(StepKind::Auth)?;
        let handle = self
            .client
            .provision(&input.request.provisioning, &tenant)
            .await?;
        Ok(serde_json::to_value(handle)?)
    }

    async fn perform_compensation(&self, input: &StepInput) -> Result<Value, CollaboratorError> {
        let handle: ResourceHandle = input.handle(StepKind::Provisioning)?;
        self.client.deprovision(&handle).await?;
        Ok(serde_json::json!({ "deprovisioned": handle.resource_id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Region;

    fn spec() -> ProvisioningSpec {
        ProvisioningSpec {
            region: Region::new("eu-west-1"),
            plan: "standard".to_string(),
            capacity_units: 4,
        }
    }

    fn tenant() -> TenantHandle {
        TenantHandle {
            tenant_ref: "IDP-0001".to_string(),
            tenant_id: "acme".to_string(),
        }
    }

    #[tokio::test]
    async fn test_provision_is_idempotent_per_tenant() {
        let provisioner = InMemoryProvisioner::new();
        let first = provisioner.provision(&spec(), &tenant()).await.unwrap();
        let second = provisioner.provision(&spec(), &tenant()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.region, "eu-west-1");
        assert_eq!(provisioner.resource_count().await, 1);
    }

    #[tokio::test]
    async fn test_deprovision_missing_resource_is_not_found() {
        let provisioner = InMemoryProvisioner::new();
        let handle = provisioner.provision(&spec(), &tenant()).await.unwrap();
        provisioner.purge().await;
        assert!(matches!(
            provisioner.deprovision(&handle).await,
            Err(CollaboratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_transient_faults_then_success() {
        let provisioner = InMemoryProvisioner::new();
        provisioner.faults().fail_next(2).await;
        assert!(provisioner.provision(&spec(), &tenant()).await.is_err());
        assert!(provisioner.provision(&spec(), &tenant()).await.is_err());
        assert!(provisioner.provision(&spec(), &tenant()).await.is_ok());
        assert_eq!(provisioner.faults().forward_calls().await, 3);
    }
}
