use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use common::{
    Direction, OrchestrationId, OrchestrationState, StepKind, StepStatus, WorkflowType,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A durable orchestration instance.
///
/// `payload` is immutable once created. `context` only grows: each completed
/// forward step merges its output under [`StepKind::context_key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationRecord {
    pub id: OrchestrationId,
    pub workflow_type: WorkflowType,
    /// Always derived from the tenant, so one tenant maps to one record.
    pub idempotency_key: String,
    /// Caller-supplied delivery identifier, kept for tracing only.
    pub delivery_key: Option<String>,
    pub state: OrchestrationState,
    pub payload: Value,
    pub context: Map<String, Value>,
    /// Root-cause failure description. Set once, never cleared.
    pub error: Option<String>,
    /// The forward step whose failure triggered compensation.
    pub failed_step: Option<StepKind>,
    /// Detail of the most recent compensation failure.
    pub compensation_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl OrchestrationRecord {
    /// Creates a new `PENDING` record.
    pub fn new(
        workflow_type: WorkflowType,
        idempotency_key: impl Into<String>,
        payload: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: OrchestrationId::new(),
            workflow_type,
            idempotency_key: idempotency_key.into(),
            delivery_key: None,
            state: OrchestrationState::Pending,
            payload,
            context: Map::new(),
            error: None,
            failed_step: None,
            compensation_error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            claimed_by: None,
            lease_expires_at: None,
        }
    }

    pub fn with_delivery_key(mut self, key: Option<String>) -> Self {
        self.delivery_key = key;
        self
    }

    /// Returns the output a completed step left in the context.
    pub fn step_output(&self, step: StepKind) -> Option<&Value> {
        self.context.get(step.context_key())
    }

    /// Returns true if some worker holds an unexpired lease at `now`.
    pub fn has_live_lease(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires_at.is_some_and(|expires| expires > now)
    }
}

/// One row of the append-only step log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: Uuid,
    pub orchestration_id: OrchestrationId,
    pub step: StepKind,
    pub direction: Direction,
    pub status: StepStatus,
    pub input: Value,
    pub output: Option<Value>,
    /// Present iff `status` is `failed`.
    pub error: Option<String>,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    /// Creates a row with the given status, started now.
    pub fn new(
        orchestration_id: OrchestrationId,
        step: StepKind,
        direction: Direction,
        status: StepStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            orchestration_id,
            step,
            direction,
            status,
            input: Value::Null,
            output: None,
            error: None,
            attempts: 0,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// A `started` row marking the beginning of a step attempt.
    pub fn started(
        orchestration_id: OrchestrationId,
        step: StepKind,
        direction: Direction,
    ) -> Self {
        Self::new(orchestration_id, step, direction, StepStatus::Started)
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = at;
        self
    }

    /// Marks the row finished now.
    pub fn finished(mut self) -> Self {
        self.completed_at = Some(Utc::now());
        self
    }

    /// True for the rows the store allows at most once per `(orchestration, step)`.
    pub fn is_unique_kind(&self) -> bool {
        matches!(
            (self.direction, self.status),
            (Direction::Forward, StepStatus::Completed) | (_, StepStatus::Compensated)
        )
    }
}

/// A lease on one orchestration record held by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub orchestration_id: OrchestrationId,
    pub token: Uuid,
    pub owner: String,
    pub lease: Duration,
    pub expires_at: DateTime<Utc>,
}

impl Claim {
    pub fn new(orchestration_id: OrchestrationId, owner: impl Into<String>, lease: Duration) -> Self {
        let now = Utc::now();
        Self {
            orchestration_id,
            token: Uuid::new_v4(),
            owner: owner.into(),
            lease,
            expires_at: lease_deadline(now, lease),
        }
    }
}

/// Returns `now + lease`, saturating instead of overflowing.
pub fn lease_deadline(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    let delta = TimeDelta::from_std(lease).unwrap_or(TimeDelta::MAX);
    now.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// One atomic state change: record update plus at most one step row.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: OrchestrationState,
    pub to: OrchestrationState,
    pub context_patch: Map<String, Value>,
    pub error: Option<String>,
    pub failed_step: Option<StepKind>,
    pub compensation_error: Option<String>,
    pub step_record: Option<StepRecord>,
}

impl Transition {
    pub fn new(from: OrchestrationState, to: OrchestrationState) -> Self {
        Self {
            from,
            to,
            context_patch: Map::new(),
            error: None,
            failed_step: None,
            compensation_error: None,
            step_record: None,
        }
    }

    /// A transition that leaves the state unchanged and only appends a row.
    pub fn stay(state: OrchestrationState) -> Self {
        Self::new(state, state)
    }

    pub fn with_step_record(mut self, record: StepRecord) -> Self {
        self.step_record = Some(record);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context_patch.insert(key.into(), value);
        self
    }

    pub fn with_failure(mut self, step: StepKind, error: impl Into<String>) -> Self {
        self.failed_step = Some(step);
        self.error = Some(error.into());
        self
    }

    pub fn with_compensation_error(mut self, error: impl Into<String>) -> Self {
        self.compensation_error = Some(error.into());
        self
    }
}

/// Result of inserting a record keyed by idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(OrchestrationRecord),
    Existing(OrchestrationRecord),
}

impl CreateOutcome {
    pub fn record(&self) -> &OrchestrationRecord {
        match self {
            CreateOutcome::Created(r) | CreateOutcome::Existing(r) => r,
        }
    }

    pub fn into_record(self) -> OrchestrationRecord {
        match self {
            CreateOutcome::Created(r) | CreateOutcome::Existing(r) => r,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}
