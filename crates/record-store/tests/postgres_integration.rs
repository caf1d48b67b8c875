//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p record-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use common::WorkflowType;
use record_store::{
    Direction, OrchestrationId, OrchestrationRecord, OrchestrationState, PostgresRecordStore,
    RecordStore, RecordStoreExt, StaleQuery, StepKind, StepRecord, StepStatus, StoreError,
    Transition,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

const LEASE: Duration = Duration::from_secs(30);

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            // Run migrations using raw_sql to execute multiple statements
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_orchestration_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresRecordStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE step_records, orchestrations")
        .execute(&pool)
        .await
        .unwrap();

    PostgresRecordStore::new(pool)
}

fn new_record(key: &str) -> OrchestrationRecord {
    OrchestrationRecord::new(
        WorkflowType::CustomerOnboarding,
        key,
        serde_json::json!({"tenant": {"tenant_id": key}}),
    )
}

async fn create(store: &PostgresRecordStore, key: &str) -> OrchestrationId {
    store
        .create_if_absent(new_record(key))
        .await
        .unwrap()
        .into_record()
        .id
}

#[tokio::test]
#[serial]
async fn test_create_and_get_roundtrip() {
    let store = get_test_store().await;
    let record = new_record("tenant:acme");
    let id = record.id;
    store.create_if_absent(record.clone()).await.unwrap();

    let loaded = store.require(id).await.unwrap();
    assert_eq!(loaded.state, OrchestrationState::Pending);
    assert_eq!(loaded.payload, record.payload);
    assert_eq!(loaded.idempotency_key, "tenant:acme");
    assert!(loaded.context.is_empty());
}

#[tokio::test]
#[serial]
async fn test_duplicate_idempotency_key_returns_existing() {
    let store = get_test_store().await;
    let first = store.create_if_absent(new_record("tenant:acme")).await.unwrap();
    let second = store.create_if_absent(new_record("tenant:acme")).await.unwrap();

    assert!(first.is_created());
    assert!(!second.is_created());
    assert_eq!(first.record().id, second.record().id);
}

#[tokio::test]
#[serial]
async fn test_concurrent_creates_produce_one_record() {
    let store = get_test_store().await;
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.create_if_absent(new_record("tenant:race")).await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().into_record().id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let counts = store.count_by_state().await.unwrap();
    assert_eq!(counts, vec![(OrchestrationState::Pending, 1)]);
}

#[tokio::test]
#[serial]
async fn test_claim_is_exclusive() {
    let store = get_test_store().await;
    let id = create(&store, "k").await;

    let claim = store.claim(id, "worker-a", LEASE).await.unwrap().unwrap();
    assert!(store.claim(id, "worker-b", LEASE).await.unwrap().is_none());

    store.release(&claim).await.unwrap();
    let reclaimed = store.claim(id, "worker-b", LEASE).await.unwrap().unwrap();
    assert_eq!(reclaimed.owner, "worker-b");
}

#[tokio::test]
#[serial]
async fn test_commit_with_lost_claim_fails() {
    let store = get_test_store().await;
    let id = create(&store, "k").await;

    let stale = store.claim(id, "crashed", Duration::ZERO).await.unwrap().unwrap();
    let _fresh = store.claim(id, "worker-b", LEASE).await.unwrap().unwrap();

    let result = store
        .commit(
            &stale,
            Transition::new(OrchestrationState::Pending, OrchestrationState::AuthInProgress)
                .with_step_record(StepRecord::started(id, StepKind::Auth, Direction::Forward)),
        )
        .await;
    assert!(matches!(result, Err(StoreError::ClaimLost(_))));
    assert!(store.step_records(id).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn test_renew_extends_only_the_holders_lease() {
    let store = get_test_store().await;
    let id = create(&store, "k").await;

    let claim = store.claim(id, "worker-a", LEASE).await.unwrap().unwrap();
    let before = store.require(id).await.unwrap().lease_expires_at.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    store.renew(&claim).await.unwrap();
    let after = store.require(id).await.unwrap().lease_expires_at.unwrap();
    assert!(after > before);

    store.release(&claim).await.unwrap();
    assert!(matches!(
        store.renew(&claim).await,
        Err(StoreError::ClaimLost(_))
    ));
}

#[tokio::test]
#[serial]
async fn test_delivery_key_is_persisted() {
    let store = get_test_store().await;
    let record = new_record("tenant:acme").with_delivery_key(Some("delivery-7".to_string()));
    let id = record.id;
    store.create_if_absent(record).await.unwrap();

    let loaded = store.require(id).await.unwrap();
    assert_eq!(loaded.delivery_key.as_deref(), Some("delivery-7"));
}

#[tokio::test]
#[serial]
async fn test_commit_persists_state_context_and_row() {
    let store = get_test_store().await;
    let id = create(&store, "k").await;
    let claim = store.claim(id, "w", LEASE).await.unwrap().unwrap();

    store
        .commit(
            &claim,
            Transition::new(OrchestrationState::Pending, OrchestrationState::AuthInProgress)
                .with_step_record(StepRecord::started(id, StepKind::Auth, Direction::Forward)),
        )
        .await
        .unwrap();
    store
        .commit(
            &claim,
            Transition::new(
                OrchestrationState::AuthInProgress,
                OrchestrationState::AuthComplete,
            )
            .with_context("tenant", serde_json::json!({"tenant_ref": "idp-7"}))
            .with_step_record(
                StepRecord::new(id, StepKind::Auth, Direction::Forward, StepStatus::Completed)
                    .with_output(serde_json::json!({"tenant_ref": "idp-7"}))
                    .with_attempts(2)
                    .finished(),
            ),
        )
        .await
        .unwrap();

    let loaded = store.require(id).await.unwrap();
    assert_eq!(loaded.state, OrchestrationState::AuthComplete);
    assert_eq!(loaded.step_output(StepKind::Auth).unwrap()["tenant_ref"], "idp-7");

    let rows = store.step_records(id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].status, StepStatus::Started);
    assert_eq!(rows[1].status, StepStatus::Completed);
    assert_eq!(rows[1].attempts, 2);
    assert!(rows[1].completed_at.is_some());
}

#[tokio::test]
#[serial]
async fn test_state_conflict_rolls_back() {
    let store = get_test_store().await;
    let id = create(&store, "k").await;
    let claim = store.claim(id, "w", LEASE).await.unwrap().unwrap();

    let result = store
        .commit(
            &claim,
            Transition::new(
                OrchestrationState::ProvInProgress,
                OrchestrationState::ProvComplete,
            )
            .with_step_record(StepRecord::new(
                id,
                StepKind::Provisioning,
                Direction::Forward,
                StepStatus::Completed,
            )),
        )
        .await;
    assert!(matches!(result, Err(StoreError::StateConflict { .. })));

    let loaded = store.require(id).await.unwrap();
    assert_eq!(loaded.state, OrchestrationState::Pending);
    assert!(store.step_records(id).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn test_failure_and_rollback_keep_root_cause() {
    let store = get_test_store().await;
    let id = create(&store, "k").await;
    let claim = store.claim(id, "w", LEASE).await.unwrap().unwrap();

    store
        .commit(
            &claim,
            Transition::new(OrchestrationState::Pending, OrchestrationState::AuthInProgress)
                .with_step_record(StepRecord::started(id, StepKind::Auth, Direction::Forward)),
        )
        .await
        .unwrap();
    store
        .commit(
            &claim,
            Transition::new(OrchestrationState::AuthInProgress, OrchestrationState::AuthFailed)
                .with_failure(StepKind::Auth, "identity provider rejected tenant")
                .with_step_record(
                    StepRecord::new(id, StepKind::Auth, Direction::Forward, StepStatus::Failed)
                        .with_error("identity provider rejected tenant")
                        .with_attempts(1)
                        .finished(),
                ),
        )
        .await
        .unwrap();
    let done = store
        .commit(
            &claim,
            Transition::new(OrchestrationState::AuthFailed, OrchestrationState::RolledBack),
        )
        .await
        .unwrap();

    assert_eq!(done.state, OrchestrationState::RolledBack);
    assert!(done.completed_at.is_some());

    let loaded = store.require(id).await.unwrap();
    assert_eq!(loaded.failed_step, Some(StepKind::Auth));
    assert_eq!(loaded.error.as_deref(), Some("identity provider rejected tenant"));
    assert!(loaded.completed_at.is_some());

    store.release(&claim).await.unwrap();
    assert!(store.claim(id, "w", LEASE).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn test_find_stale_excludes_leased_records() {
    let store = get_test_store().await;
    let idle = create(&store, "idle").await;
    let leased = create(&store, "leased").await;
    store.claim(leased, "w", LEASE).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;

    let stale = store
        .find_stale(StaleQuery::older_than(Duration::from_millis(10)))
        .await
        .unwrap();
    let ids: Vec<_> = stale.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![idle]);

    let none = store
        .find_stale(StaleQuery::older_than(Duration::from_secs(3600)))
        .await
        .unwrap();
    assert!(none.is_empty());
}
