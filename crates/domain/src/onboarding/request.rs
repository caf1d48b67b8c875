//! Onboarding request handed to the orchestrator by the trigger source.

use serde::{Deserialize, Serialize};

use super::ValidationError;
use super::value_objects::{EmailAddress, Region, TenantId};
use crate::error::DomainError;

/// Prefix of idempotency keys derived from the tenant identifier.
pub const IDEMPOTENCY_KEY_PREFIX: &str = "tenant:";

/// Identity of the tenant to create in the identity federation provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantIdentity {
    pub tenant_id: TenantId,
    pub display_name: String,
    pub admin_email: EmailAddress,
    /// Email domain federated for the tenant's users, if any.
    #[serde(default)]
    pub domain: Option<String>,
}

/// What to provision in the cloud backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningSpec {
    pub region: Region,
    pub plan: String,
    pub capacity_units: u32,
}

/// Replication settings for the disaster-recovery platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisasterRecoverySpec {
    pub secondary_region: Region,
    pub rpo_minutes: u32,
}

/// A validated-on-intake request to onboard one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingRequest {
    pub tenant: TenantIdentity,
    pub provisioning: ProvisioningSpec,
    pub disaster_recovery: DisasterRecoverySpec,
}

impl OnboardingRequest {
    /// Validates every field. Returns the first violation found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.tenant.tenant_id.validate()?;
        if self.tenant.display_name.trim().is_empty() {
            return Err(ValidationError::Empty {
                field: "display_name",
            });
        }
        self.tenant.admin_email.validate()?;
        if let Some(domain) = &self.tenant.domain
            && domain.trim().is_empty()
        {
            return Err(ValidationError::Empty { field: "domain" });
        }

        if self.provisioning.region.is_empty() {
            return Err(ValidationError::Empty { field: "region" });
        }
        if self.provisioning.plan.trim().is_empty() {
            return Err(ValidationError::Empty { field: "plan" });
        }
        if self.provisioning.capacity_units == 0 {
            return Err(ValidationError::NotPositive {
                field: "capacity_units",
            });
        }

        if self.disaster_recovery.secondary_region.is_empty() {
            return Err(ValidationError::Empty {
                field: "secondary_region",
            });
        }
        if self.disaster_recovery.secondary_region == self.provisioning.region {
            return Err(ValidationError::SameRegion(
                self.provisioning.region.to_string(),
            ));
        }
        if self.disaster_recovery.rpo_minutes == 0 {
            return Err(ValidationError::NotPositive {
                field: "rpo_minutes",
            });
        }

        Ok(())
    }

    /// Derives the idempotency key for this request from the tenant identifier.
    pub fn idempotency_key(&self) -> String {
        format!("{IDEMPOTENCY_KEY_PREFIX}{}", self.tenant.tenant_id)
    }

    /// Serializes the request into the immutable orchestration payload.
    pub fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Validates the request and returns its idempotency key and payload.
    pub fn into_payload(self) -> Result<(String, serde_json::Value), DomainError> {
        self.validate()?;
        let key = self.idempotency_key();
        Ok((key, self.to_payload()?))
    }

    /// Reads a request back out of an orchestration payload.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(payload.clone())
    }
}
