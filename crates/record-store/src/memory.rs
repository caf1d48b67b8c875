use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{OrchestrationId, OrchestrationState};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    Claim, CreateOutcome, OrchestrationRecord, Result, StaleQuery, StepRecord, StoreError,
    Transition, lease_deadline,
    store::{RecordStore, apply_transition, validate_transition},
};

#[derive(Default)]
struct Inner {
    records: HashMap<OrchestrationId, OrchestrationRecord>,
    claim_tokens: HashMap<OrchestrationId, Uuid>,
    by_key: HashMap<String, OrchestrationId>,
    steps: HashMap<OrchestrationId, Vec<StepRecord>>,
}

/// In-memory record store implementation.
///
/// A single lock guards records, leases and step logs, so every commit is
/// atomic with respect to readers. Provides the same interface as the
/// PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryRecordStore {
    /// Creates a new empty in-memory record store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of orchestration records stored.
    pub async fn record_count(&self) -> usize {
        self.inner.read().await.records.len()
    }

    /// Returns the total number of step rows across all orchestrations.
    pub async fn step_count(&self) -> usize {
        self.inner.read().await.steps.values().map(Vec::len).sum()
    }

    /// Clears all records and step rows.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        *inner = Inner::default();
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create_if_absent(&self, record: OrchestrationRecord) -> Result<CreateOutcome> {
        let mut inner = self.inner.write().await;

        if let Some(existing_id) = inner.by_key.get(&record.idempotency_key) {
            let existing = inner
                .records
                .get(existing_id)
                .cloned()
                .ok_or_else(|| StoreError::IdempotencyConflict(record.idempotency_key.clone()))?;
            return Ok(CreateOutcome::Existing(existing));
        }

        inner
            .by_key
            .insert(record.idempotency_key.clone(), record.id);
        inner.steps.insert(record.id, Vec::new());
        inner.records.insert(record.id, record.clone());
        Ok(CreateOutcome::Created(record))
    }

    async fn get(&self, id: OrchestrationId) -> Result<Option<OrchestrationRecord>> {
        Ok(self.inner.read().await.records.get(&id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<OrchestrationRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_key
            .get(key)
            .and_then(|id| inner.records.get(id))
            .cloned())
    }

    async fn claim(
        &self,
        id: OrchestrationId,
        owner: &str,
        lease: Duration,
    ) -> Result<Option<Claim>> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let Some(record) = inner.records.get_mut(&id) else {
            return Ok(None);
        };
        if record.state.is_terminal() || record.has_live_lease(now) {
            return Ok(None);
        }

        let claim = Claim::new(id, owner, lease);
        record.claimed_by = Some(claim.owner.clone());
        record.lease_expires_at = Some(claim.expires_at);
        inner.claim_tokens.insert(id, claim.token);
        Ok(Some(claim))
    }

    async fn renew(&self, claim: &Claim) -> Result<()> {
        let mut inner = self.inner.write().await;
        let inner = &mut *inner;
        let id = claim.orchestration_id;
        let now = Utc::now();

        let record = inner.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if inner.claim_tokens.get(&id) != Some(&claim.token) || !record.has_live_lease(now) {
            return Err(StoreError::ClaimLost(id));
        }
        record.lease_expires_at = Some(lease_deadline(now, claim.lease));
        Ok(())
    }

    async fn release(&self, claim: &Claim) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.claim_tokens.get(&claim.orchestration_id) != Some(&claim.token) {
            return Ok(());
        }
        inner.claim_tokens.remove(&claim.orchestration_id);
        if let Some(record) = inner.records.get_mut(&claim.orchestration_id) {
            record.claimed_by = None;
            record.lease_expires_at = None;
        }
        Ok(())
    }

    async fn commit(&self, claim: &Claim, transition: Transition) -> Result<OrchestrationRecord> {
        let mut inner = self.inner.write().await;
        let inner = &mut *inner;
        let id = claim.orchestration_id;
        let now = Utc::now();

        let record = inner.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if inner.claim_tokens.get(&id) != Some(&claim.token) || !record.has_live_lease(now) {
            return Err(StoreError::ClaimLost(id));
        }

        let steps = inner.steps.entry(id).or_default();
        validate_transition(record, &transition, steps)?;

        apply_transition(record, &transition, claim.lease, now);
        if let Some(row) = transition.step_record {
            steps.push(row);
        }
        Ok(record.clone())
    }

    async fn step_records(&self, id: OrchestrationId) -> Result<Vec<StepRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .steps
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_stale(&self, query: StaleQuery) -> Result<Vec<OrchestrationRecord>> {
        let inner = self.inner.read().await;
        let now = Utc::now();
        let mut stale: Vec<_> = inner
            .records
            .values()
            .filter(|r| query.matches_state(r.state))
            .filter(|r| r.updated_at < query.updated_before)
            .filter(|r| !r.has_live_lease(now))
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.updated_at);
        stale.truncate(query.limit);
        Ok(stale)
    }

    async fn count_by_state(&self) -> Result<Vec<(OrchestrationState, u64)>> {
        let inner = self.inner.read().await;
        let mut counts: HashMap<OrchestrationState, u64> = HashMap::new();
        for record in inner.records.values() {
            *counts.entry(record.state).or_default() += 1;
        }
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort_by_key(|(state, _)| state.as_str());
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RecordStoreExt;
    use common::{Direction, StepKind, StepStatus, WorkflowType};

    fn new_record(key: &str) -> OrchestrationRecord {
        OrchestrationRecord::new(
            WorkflowType::CustomerOnboarding,
            key,
            serde_json::json!({"tenant": key}),
        )
    }

    const LEASE: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_create_if_absent_suppresses_duplicates() {
        let store = InMemoryRecordStore::new();
        let first = store.create_if_absent(new_record("tenant:acme")).await.unwrap();
        assert!(first.is_created());

        let second = store.create_if_absent(new_record("tenant:acme")).await.unwrap();
        assert!(!second.is_created());
        assert_eq!(second.record().id, first.record().id);
        assert_eq!(store.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_find_by_idempotency_key() {
        let store = InMemoryRecordStore::new();
        let created = store
            .create_if_absent(new_record("tenant:acme"))
            .await
            .unwrap()
            .into_record();
        let found = store.find_by_idempotency_key("tenant:acme").await.unwrap();
        assert_eq!(found.map(|r| r.id), Some(created.id));
        assert!(store.find_by_idempotency_key("tenant:other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_until_released() {
        let store = InMemoryRecordStore::new();
        let id = store
            .create_if_absent(new_record("k"))
            .await
            .unwrap()
            .into_record()
            .id;

        let claim = store.claim(id, "worker-a", LEASE).await.unwrap().unwrap();
        assert!(store.claim(id, "worker-b", LEASE).await.unwrap().is_none());

        let record = store.require(id).await.unwrap();
        assert_eq!(record.claimed_by.as_deref(), Some("worker-a"));

        store.release(&claim).await.unwrap();
        assert!(store.claim(id, "worker-b", LEASE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken_over() {
        let store = InMemoryRecordStore::new();
        let id = store
            .create_if_absent(new_record("k"))
            .await
            .unwrap()
            .into_record()
            .id;

        let stale_claim = store.claim(id, "crashed", Duration::ZERO).await.unwrap().unwrap();
        let fresh = store.claim(id, "worker-b", LEASE).await.unwrap().unwrap();

        let t = Transition::new(OrchestrationState::Pending, OrchestrationState::AuthInProgress)
            .with_step_record(StepRecord::started(id, StepKind::Auth, Direction::Forward));
        assert!(matches!(
            store.commit(&stale_claim, t.clone()).await,
            Err(StoreError::ClaimLost(_))
        ));
        assert!(store.commit(&fresh, t).await.is_ok());

        // A lost claim must not release the new owner's lease.
        store.release(&stale_claim).await.unwrap();
        assert!(store.claim(id, "worker-c", LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_renew_extends_live_lease_only() {
        let store = InMemoryRecordStore::new();
        let id = store
            .create_if_absent(new_record("k"))
            .await
            .unwrap()
            .into_record()
            .id;

        let claim = store.claim(id, "worker-a", LEASE).await.unwrap().unwrap();
        let before = store.require(id).await.unwrap().lease_expires_at.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.renew(&claim).await.unwrap();
        let after = store.require(id).await.unwrap().lease_expires_at.unwrap();
        assert!(after > before);

        let other = store
            .create_if_absent(new_record("other"))
            .await
            .unwrap()
            .into_record()
            .id;
        let lapsed = store.claim(other, "crashed", Duration::ZERO).await.unwrap().unwrap();
        assert!(matches!(
            store.renew(&lapsed).await,
            Err(StoreError::ClaimLost(_))
        ));

        store.release(&claim).await.unwrap();
        assert!(matches!(
            store.renew(&claim).await,
            Err(StoreError::ClaimLost(_))
        ));
    }

    #[tokio::test]
    async fn test_commit_is_atomic_on_rejection() {
        let store = InMemoryRecordStore::new();
        let id = store
            .create_if_absent(new_record("k"))
            .await
            .unwrap()
            .into_record()
            .id;
        let claim = store.claim(id, "w", LEASE).await.unwrap().unwrap();

        let bad = Transition::new(OrchestrationState::AuthComplete, OrchestrationState::ProvInProgress)
            .with_step_record(StepRecord::started(id, StepKind::Provisioning, Direction::Forward));
        assert!(store.commit(&claim, bad).await.is_err());

        let record = store.require(id).await.unwrap();
        assert_eq!(record.state, OrchestrationState::Pending);
        assert!(store.step_records(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_appends_rows_in_order() {
        let store = InMemoryRecordStore::new();
        let id = store
            .create_if_absent(new_record("k"))
            .await
            .unwrap()
            .into_record()
            .id;
        let claim = store.claim(id, "w", LEASE).await.unwrap().unwrap();

        store
            .commit(
                &claim,
                Transition::new(OrchestrationState::Pending, OrchestrationState::AuthInProgress)
                    .with_step_record(StepRecord::started(id, StepKind::Auth, Direction::Forward)),
            )
            .await
            .unwrap();
        let record = store
            .commit(
                &claim,
                Transition::new(
                    OrchestrationState::AuthInProgress,
                    OrchestrationState::AuthComplete,
                )
                .with_context("tenant", serde_json::json!({"tenant_ref": "idp-1"}))
                .with_step_record(
                    StepRecord::new(id, StepKind::Auth, Direction::Forward, StepStatus::Completed)
                        .with_attempts(1)
                        .finished(),
                ),
            )
            .await
            .unwrap();

        assert_eq!(record.state, OrchestrationState::AuthComplete);
        assert_eq!(record.step_output(StepKind::Auth).unwrap()["tenant_ref"], "idp-1");

        let rows = store.step_records(id).await.unwrap();
        let statuses: Vec<_> = rows.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![StepStatus::Started, StepStatus::Completed]);
        assert_eq!(store.completed_steps(id).await.unwrap(), vec![StepKind::Auth]);
    }

    #[tokio::test]
    async fn test_terminal_records_cannot_be_claimed() {
        let store = InMemoryRecordStore::new();
        let id = store
            .create_if_absent(new_record("k"))
            .await
            .unwrap()
            .into_record()
            .id;
        let claim = store.claim(id, "w", LEASE).await.unwrap().unwrap();
        store
            .commit(
                &claim,
                Transition::new(OrchestrationState::Pending, OrchestrationState::AuthInProgress)
                    .with_step_record(StepRecord::started(id, StepKind::Auth, Direction::Forward)),
            )
            .await
            .unwrap();
        let record = store
            .commit(
                &claim,
                Transition::new(
                    OrchestrationState::AuthInProgress,
                    OrchestrationState::AuthFailed,
                )
                .with_failure(StepKind::Auth, "rejected")
                .with_step_record(
                    StepRecord::new(id, StepKind::Auth, Direction::Forward, StepStatus::Failed)
                        .with_error("rejected"),
                ),
            )
            .await;
        assert!(record.is_ok());
        let record = store
            .commit(
                &claim,
                Transition::new(OrchestrationState::AuthFailed, OrchestrationState::RolledBack),
            )
            .await
            .unwrap();
        assert!(record.completed_at.is_some());

        store.release(&claim).await.unwrap();
        assert!(store.claim(id, "w", LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_stale_skips_leased_and_terminal() {
        let store = InMemoryRecordStore::new();
        let idle = store
            .create_if_absent(new_record("idle"))
            .await
            .unwrap()
            .into_record()
            .id;
        let leased = store
            .create_if_absent(new_record("leased"))
            .await
            .unwrap()
            .into_record()
            .id;
        store.claim(leased, "w", LEASE).await.unwrap().unwrap();

        let cutoff = Utc::now() + chrono::TimeDelta::seconds(1);
        let stale = store.find_stale(StaleQuery::new(cutoff)).await.unwrap();
        let ids: Vec<_> = stale.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![idle]);

        let none = store
            .find_stale(StaleQuery::new(Utc::now() - chrono::TimeDelta::hours(1)))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_count_by_state() {
        let store = InMemoryRecordStore::new();
        store.create_if_absent(new_record("a")).await.unwrap();
        store.create_if_absent(new_record("b")).await.unwrap();
        let counts = store.count_by_state().await.unwrap();
        assert_eq!(counts, vec![(OrchestrationState::Pending, 2)]);
    }
}
