//! Domain layer for the onboarding orchestrator.
//!
//! This crate provides the onboarding request handed in by the trigger
//! source, its value objects and validation rules, and the derivation of
//! the idempotency key used to suppress duplicate deliveries.

pub mod error;
pub mod onboarding;

pub use error::DomainError;
pub use onboarding::{
    DisasterRecoverySpec, EmailAddress, OnboardingRequest, ProvisioningSpec, Region, TenantId,
    TenantIdentity, ValidationError,
};

