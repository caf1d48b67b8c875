//! Identity federation client and the auth step.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::StepKind;
use domain::TenantIdentity;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use super::{FaultInjector, SagaStep, StepInput};
use crate::error::CollaboratorError;

/// Reference to a tenant registered with the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantHandle {
    pub tenant_ref: String,
    pub tenant_id: String,
}

/// Registers tenants with the identity federation provider.
///
/// `create_tenant` must be idempotent per tenant id: a retry after a lost
/// response returns the existing handle.
#[async_trait]
pub trait IdentityFederationClient: Send + Sync {
    async fn create_tenant(&self, tenant: &TenantIdentity)
    -> Result<TenantHandle, CollaboratorError>;

    async fn delete_tenant(&self, handle: &TenantHandle) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Default)]
struct IdentityState {
    tenants: HashMap<String, TenantHandle>,
    next_id: u32,
}

/// In-memory identity provider for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdentityFederation {
    state: Arc<Mutex<IdentityState>>,
    faults: FaultInjector,
}

impl InMemoryIdentityFederation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Returns the number of registered tenants.
    pub async fn tenant_count(&self) -> usize {
        self.state.lock().await.tenants.len()
    }

    pub async fn has_tenant(&self, tenant_id: &str) -> bool {
        self.state.lock().await.tenants.contains_key(tenant_id)
    }

    /// Deletes a tenant behind the saga's back.
    pub async fn remove_tenant(&self, tenant_id: &str) -> bool {
        self.state.lock().await.tenants.remove(tenant_id).is_some()
    }
}

#[async_trait]
impl IdentityFederationClient for InMemoryIdentityFederation {
    async fn create_tenant(
        &self,
        tenant: &TenantIdentity,
    ) -> Result<TenantHandle, CollaboratorError> {
        self.faults.before_forward("identity provider").await?;

        let mut state = self.state.lock().await;
        let tenant_id = tenant.tenant_id.as_str().to_string();
        if let Some(existing) = state.tenants.get(&tenant_id) {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let handle = TenantHandle {
            tenant_ref: format!("IDP-{:04}", state.next_id),
            tenant_id: tenant_id.clone(),
        };
        state.tenants.insert(tenant_id, handle.clone());
        Ok(handle)
    }

    async fn delete_tenant(&self, handle: &TenantHandle) -> Result<(), CollaboratorError> {
        self.faults.before_compensation("identity provider").await?;

        let mut state = self.state.lock().await;
        match state.tenants.get(&handle.tenant_id) {
            Some(existing) if existing.tenant_ref == handle.tenant_ref => {
                state.tenants.remove(&handle.tenant_id);
                Ok(())
            }
            _ => Err(CollaboratorError::NotFound(handle.tenant_ref.clone())),
        }
    }
}

/// Registers the tenant with the identity provider.
pub struct AuthStep<C> {
    client: C,
}

impl<C: IdentityFederationClient> AuthStep<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: IdentityFederationClient> SagaStep for AuthStep<C> {
    fn kind(&self) -> StepKind {
        StepKind::Auth
    }

    async fn perform_forward(&self, input: &StepInput) -> Result<Value, CollaboratorError> {
        let handle = self.client.create_tenant(&input.request.tenant).await?;
        Ok(serde_json::to_value(handle)?)
    }

    async fn perform_compensation(&self, input: &StepInput) -> Result<Value, CollaboratorError> {
        let handle: TenantHandle = input.handle(StepKind::Auth)?;
        self.client.delete_tenant(&handle).await?;
        Ok(serde_json::json!({ "deleted": handle.tenant_ref }))
    }
}
