use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Direction, OrchestrationId, OrchestrationState, StepKind, StepStatus};

use crate::{
    Claim, CreateOutcome, OrchestrationRecord, Result, StaleQuery, StepRecord, StoreError,
    Transition, record::lease_deadline,
};

/// Core trait for orchestration record store implementations.
///
/// The store is the single source of truth for orchestration progress. Every
/// mutation of a record goes through [`RecordStore::commit`] under a
/// [`Claim`], so at most one worker advances a given record at a time.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts `record` unless one with the same idempotency key exists.
    ///
    /// Returns the existing record untouched in that case.
    async fn create_if_absent(&self, record: OrchestrationRecord) -> Result<CreateOutcome>;

    /// Retrieves a record by ID.
    async fn get(&self, id: OrchestrationId) -> Result<Option<OrchestrationRecord>>;

    /// Retrieves a record by its idempotency key.
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<OrchestrationRecord>>;

    /// Attempts to lease a non-terminal record for `lease`.
    ///
    /// Returns `None` if the record is terminal, unknown, or leased by
    /// someone else. Losing claimants must back off.
    async fn claim(
        &self,
        id: OrchestrationId,
        owner: &str,
        lease: Duration,
    ) -> Result<Option<Claim>>;

    /// Extends a live lease by `claim.lease` from now.
    ///
    /// Fails with `ClaimLost` if the lease already lapsed or passed to
    /// another worker. Holders call this while a step is running.
    async fn renew(&self, claim: &Claim) -> Result<()>;

    /// Releases a lease if `claim` still holds it. Releasing a lost lease is a no-op.
    async fn release(&self, claim: &Claim) -> Result<()>;

    /// Applies a transition atomically: state, context, failure fields and
    /// at most one step row become visible together or not at all.
    ///
    /// Fails with `ClaimLost` if the claim no longer holds a live lease,
    /// `StateConflict` if the record is not in `transition.from`, and
    /// `DuplicateStepRecord` if the row would break the once-per-step rules.
    /// A successful commit renews the lease.
    async fn commit(&self, claim: &Claim, transition: Transition) -> Result<OrchestrationRecord>;

    /// Returns the step log of an orchestration in append order.
    async fn step_records(&self, id: OrchestrationId) -> Result<Vec<StepRecord>>;

    /// Finds unleased records that have not been updated recently.
    async fn find_stale(&self, query: StaleQuery) -> Result<Vec<OrchestrationRecord>>;

    /// Counts records per state.
    async fn count_by_state(&self) -> Result<Vec<(OrchestrationState, u64)>>;
}

/// Extension trait providing convenience methods for record stores.
#[async_trait]
pub trait RecordStoreExt: RecordStore {
    /// Retrieves a record, failing with `NotFound` if it does not exist.
    async fn require(&self, id: OrchestrationId) -> Result<OrchestrationRecord> {
        self.get(id).await?.ok_or(StoreError::NotFound(id))
    }

    /// Forward steps with a `completed` row, in completion order.
    async fn completed_steps(&self, id: OrchestrationId) -> Result<Vec<StepKind>> {
        Ok(self
            .step_records(id)
            .await?
            .into_iter()
            .filter(|r| r.direction == Direction::Forward && r.status == StepStatus::Completed)
            .map(|r| r.step)
            .collect())
    }
}

// Blanket implementation for all RecordStore implementations
impl<T: RecordStore + ?Sized> RecordStoreExt for T {}

/// Checks a transition against the record it would apply to.
///
/// `existing` is the step log already stored for the record.
pub fn validate_transition(
    record: &OrchestrationRecord,
    transition: &Transition,
    existing: &[StepRecord],
) -> Result<()> {
    if record.state.is_terminal() {
        return Err(StoreError::TerminalState {
            id: record.id,
            state: record.state,
        });
    }
    if record.state != transition.from {
        return Err(StoreError::StateConflict {
            id: record.id,
            expected: transition.from,
            actual: record.state,
        });
    }

    if let Some(row) = &transition.step_record {
        if row.orchestration_id != record.id {
            return Err(StoreError::InvalidStepRecord(format!(
                "row belongs to {}, not {}",
                row.orchestration_id, record.id
            )));
        }
        if (row.status == StepStatus::Failed) != row.error.is_some() {
            return Err(StoreError::InvalidStepRecord(
                "error must be present exactly when status is failed".to_string(),
            ));
        }
        if row.is_unique_kind()
            && existing.iter().any(|r| {
                r.step == row.step && r.direction == row.direction && r.status == row.status
            })
        {
            return Err(StoreError::DuplicateStepRecord {
                id: record.id,
                step: row.step,
                status: row.status,
            });
        }
    } else if transition.from == transition.to {
        return Err(StoreError::InvalidStepRecord(
            "a same-state transition must append a step record".to_string(),
        ));
    }

    Ok(())
}

/// Applies a validated transition to the in-memory copy of a record.
pub fn apply_transition(
    record: &mut OrchestrationRecord,
    transition: &Transition,
    lease: Duration,
    now: DateTime<Utc>,
) {
    record.state = transition.to;
    for (key, value) in &transition.context_patch {
        record.context.insert(key.clone(), value.clone());
    }
    if record.error.is_none() {
        record.error = transition.error.clone();
    }
    if record.failed_step.is_none() {
        record.failed_step = transition.failed_step;
    }
    if transition.compensation_error.is_some() {
        record.compensation_error = transition.compensation_error.clone();
    }
    record.updated_at = now;
    if transition.to.is_terminal() && record.completed_at.is_none() {
        record.completed_at = Some(now);
    }
    record.lease_expires_at = Some(lease_deadline(now, lease));
}
