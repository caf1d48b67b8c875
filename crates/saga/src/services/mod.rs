//! Collaborator clients, in-memory implementations and the step adapters
//! that bind them to the onboarding saga.

pub mod disaster_recovery;
pub mod identity;
pub mod provisioning;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Direction, OrchestrationId, StepKind};
use domain::OnboardingRequest;
use record_store::OrchestrationRecord;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::CollaboratorError;

pub use disaster_recovery::{
    DisasterRecoveryClient, DisasterRecoveryStep, InMemoryDisasterRecovery, ReplicationHandle,
};
pub use identity::{AuthStep, IdentityFederationClient, InMemoryIdentityFederation, TenantHandle};
pub use provisioning::{InMemoryProvisioner, ProvisioningClient, ProvisioningStep, ResourceHandle};

/// Everything a step needs to run: the original request and the outputs of
/// the steps completed before it.
#[derive(Debug, Clone)]
pub struct StepInput {
    pub orchestration_id: OrchestrationId,
    pub request: OnboardingRequest,
    pub context: Map<String, Value>,
}

impl StepInput {
    /// Decodes the request out of a record's payload.
    pub fn from_record(record: &OrchestrationRecord) -> Result<Self, CollaboratorError> {
        Ok(Self {
            orchestration_id: record.id,
            request: OnboardingRequest::from_payload(&record.payload)?,
            context: record.context.clone(),
        })
    }

    /// Reads the handle a completed step left in the context.
    pub fn handle<T: DeserializeOwned>(&self, step: StepKind) -> Result<T, CollaboratorError> {
        let value = self.context.get(step.context_key()).ok_or_else(|| {
            CollaboratorError::Permanent(format!("no {step} output in context"))
        })?;
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// Payload section each step consumes in the forward direction.
fn payload_section(step: StepKind) -> &'static str {
    match step {
        StepKind::Auth => "tenant",
        StepKind::Provisioning => "provisioning",
        StepKind::DisasterRecovery => "disaster_recovery",
    }
}

/// The `input` column of a step row: the request section for forward work,
/// the remote handle for compensation.
pub fn row_input(record: &OrchestrationRecord, step: StepKind, direction: Direction) -> Value {
    let value = match direction {
        Direction::Forward => record.payload.get(payload_section(step)),
        Direction::Compensation => record.step_output(step),
    };
    value.cloned().unwrap_or(Value::Null)
}

/// One step of the onboarding saga, forward and backward.
#[async_trait]
pub trait SagaStep: Send + Sync {
    fn kind(&self) -> StepKind;

    /// Performs the step and returns the handle to store in the context.
    async fn perform_forward(&self, input: &StepInput) -> Result<Value, CollaboratorError>;

    /// Undoes the step using the handle stored by [`SagaStep::perform_forward`].
    async fn perform_compensation(&self, input: &StepInput) -> Result<Value, CollaboratorError>;
}

/// Steps by kind.
#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<StepKind, Arc<dyn SagaStep>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the three onboarding steps bound to the given clients.
    pub fn onboarding<I, P, D>(identity: I, provisioner: P, disaster_recovery: D) -> Self
    where
        I: IdentityFederationClient + 'static,
        P: ProvisioningClient + 'static,
        D: DisasterRecoveryClient + 'static,
    {
        Self::new()
            .with_step(AuthStep::new(identity))
            .with_step(ProvisioningStep::new(provisioner))
            .with_step(DisasterRecoveryStep::new(disaster_recovery))
    }

    pub fn with_step(mut self, step: impl SagaStep + 'static) -> Self {
        self.register(Arc::new(step));
        self
    }

    /// Registers a step, replacing any previous one of the same kind.
    pub fn register(&mut self, step: Arc<dyn SagaStep>) {
        self.steps.insert(step.kind(), step);
    }

    pub fn get(&self, kind: StepKind) -> Option<Arc<dyn SagaStep>> {
        self.steps.get(&kind).cloned()
    }

    pub fn kinds(&self) -> impl Iterator<Item = StepKind> + '_ {
        self.steps.keys().copied()
    }
}

#[derive(Debug, Default)]
struct FaultState {
    transient_failures: u32,
    permanent: Option<String>,
    compensation_failures: u32,
    latency: Duration,
    forward_calls: u32,
    compensation_calls: u32,
}

/// Fault injection and call counting shared by the in-memory clients.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    state: Arc<Mutex<FaultState>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `n` forward calls with a transient error.
    pub async fn fail_next(&self, n: u32) {
        self.state.lock().await.transient_failures = n;
    }

    /// Fails every forward call with a permanent error.
    pub async fn fail_permanently(&self, reason: impl Into<String>) {
        self.state.lock().await.permanent = Some(reason.into());
    }

    /// Fails the next `n` compensation calls with a transient error.
    pub async fn fail_compensation_next(&self, n: u32) {
        self.state.lock().await.compensation_failures = n;
    }

    /// Delays every call by `latency` before it takes effect.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = latency;
    }

    /// Clears all injected faults. Call counters are kept.
    pub async fn heal(&self) {
        let mut state = self.state.lock().await;
        state.transient_failures = 0;
        state.permanent = None;
        state.compensation_failures = 0;
        state.latency = Duration::ZERO;
    }

    pub async fn forward_calls(&self) -> u32 {
        self.state.lock().await.forward_calls
    }

    pub async fn compensation_calls(&self) -> u32 {
        self.state.lock().await.compensation_calls
    }

    pub(crate) async fn before_forward(&self, service: &str) -> Result<(), CollaboratorError> {
        let latency = {
            let mut state = self.state.lock().await;
            state.forward_calls += 1;
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().await;
        if let Some(reason) = &state.permanent {
            return Err(CollaboratorError::Permanent(format!("{service}: {reason}")));
        }
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(CollaboratorError::Transient(format!(
                "{service} temporarily unavailable"
            )));
        }
        Ok(())
    }

    pub(crate) async fn before_compensation(&self, service: &str) -> Result<(), CollaboratorError> {
        let latency = {
            let mut state = self.state.lock().await;
            state.compensation_calls += 1;
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().await;
        if state.compensation_failures > 0 {
            state.compensation_failures -= 1;
            return Err(CollaboratorError::Transient(format!(
                "{service} temporarily unavailable"
            )));
        }
        Ok(())
    }
}
