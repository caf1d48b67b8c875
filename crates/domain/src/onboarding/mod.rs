//! Onboarding request and related types.

mod request;
mod value_objects;

pub use request::{
    DisasterRecoverySpec, IDEMPOTENCY_KEY_PREFIX, OnboardingRequest, ProvisioningSpec,
    TenantIdentity,
};
pub use value_objects::{EmailAddress, Region, TenantId};

use thiserror::Error;

/// A field of an onboarding request failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("Invalid tenant_id '{0}': use lowercase letters, digits and '-'")]
    InvalidTenantId(String),

    #[error("Invalid admin_email '{0}'")]
    InvalidEmail(String),

    #[error("{field} must be greater than 0")]
    NotPositive { field: &'static str },

    /// The DR secondary region must differ from the primary region.
    #[error("secondary_region must differ from primary region {0}")]
    SameRegion(String),
}
