//! Durable saga orchestration for tenant onboarding.
//!
//! An onboarding runs three steps against external collaborators:
//! 1. Register the tenant with the identity provider
//! 2. Provision the tenant's primary resources
//! 3. Configure disaster recovery replication
//!
//! Every state change is persisted through the record store before the next
//! step runs. If a step fails, the steps completed before it are compensated
//! in reverse order. Stale records are picked up again by the poller, so a
//! crashed worker never leaves an onboarding half done.

pub mod compensation;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod executor;
pub mod notifier;
pub mod poller;
pub mod retry;
pub mod services;
pub mod transitions;

pub use compensation::CompensationRegistry;
pub use dispatcher::{Dispatcher, IntakeReceipt};
pub use engine::{DispatchOutcome, EngineConfig, SagaEngine};
pub use error::{CollaboratorError, Result, SagaError};
pub use executor::{StepExecutor, StepOutcome};
pub use notifier::{
    Completion, CompletionNotifier, CompletionOutcome, LoggingNotifier, RecordingNotifier,
};
pub use poller::{PollerConfig, StalePoller};
pub use retry::{RetryOutcome, RetryPolicy, RetryPredicate, default_predicate, retry};
pub use services::{
    AuthStep, DisasterRecoveryClient, DisasterRecoveryStep, FaultInjector,
    IdentityFederationClient, InMemoryDisasterRecovery, InMemoryIdentityFederation,
    InMemoryProvisioner, ProvisioningClient, ProvisioningStep, ReplicationHandle, ResourceHandle,
    SagaStep, StepInput, StepRegistry, TenantHandle,
};
pub use transitions::Plan;
