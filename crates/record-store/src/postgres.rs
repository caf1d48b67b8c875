use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{
    Direction, OrchestrationId, OrchestrationState, StepKind, StepStatus, WorkflowType,
};
use serde_json::{Map, Value};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Claim, CreateOutcome, OrchestrationRecord, Result, StaleQuery, StepRecord, StoreError,
    Transition, lease_deadline,
    store::{RecordStore, apply_transition, validate_transition},
};

const RECORD_COLUMNS: &str = "id, workflow_type, idempotency_key, delivery_key, state, payload, context, \
     error, failed_step, compensation_error, created_at, updated_at, completed_at, \
     claimed_by, lease_expires_at";

const STEP_COLUMNS: &str = "id, orchestration_id, step, direction, status, input, output, \
     error, attempts, started_at, completed_at";

/// PostgreSQL-backed record store implementation.
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Creates a new PostgreSQL record store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: &PgRow) -> Result<OrchestrationRecord> {
        let context: Value = row.try_get("context")?;
        let context = match context {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(StoreError::Decode(format!(
                    "context must be an object, found {other}"
                )));
            }
        };
        let failed_step: Option<String> = row.try_get("failed_step")?;

        Ok(OrchestrationRecord {
            id: OrchestrationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            workflow_type: WorkflowType::from_str(row.try_get("workflow_type")?)?,
            idempotency_key: row.try_get("idempotency_key")?,
            delivery_key: row.try_get("delivery_key")?,
            state: OrchestrationState::from_str(row.try_get("state")?)?,
            payload: row.try_get("payload")?,
            context,
            error: row.try_get("error")?,
            failed_step: failed_step.as_deref().map(StepKind::from_str).transpose()?,
            compensation_error: row.try_get("compensation_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
            claimed_by: row.try_get("claimed_by")?,
            lease_expires_at: row.try_get("lease_expires_at")?,
        })
    }

    fn row_to_step(row: &PgRow) -> Result<StepRecord> {
        let attempts: i32 = row.try_get("attempts")?;
        Ok(StepRecord {
            id: row.try_get("id")?,
            orchestration_id: OrchestrationId::from_uuid(row.try_get::<Uuid, _>("orchestration_id")?),
            step: StepKind::from_str(row.try_get("step")?)?,
            direction: Direction::from_str(row.try_get("direction")?)?,
            status: StepStatus::from_str(row.try_get("status")?)?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            attempts: u32::try_from(attempts)
                .map_err(|_| StoreError::Decode(format!("negative attempts: {attempts}")))?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    async fn fetch_steps<'e, E>(executor: E, id: OrchestrationId) -> Result<Vec<StepRecord>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM step_records WHERE orchestration_id = $1 ORDER BY seq ASC"
        ))
        .bind(id.as_uuid())
        .fetch_all(executor)
        .await?;

        rows.iter().map(Self::row_to_step).collect()
    }

    async fn insert_record(&self, record: &OrchestrationRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO orchestrations (id, workflow_type, idempotency_key, delivery_key, state,
                                        payload, context, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.workflow_type.as_str())
        .bind(&record.idempotency_key)
        .bind(&record.delivery_key)
        .bind(record.state.as_str())
        .bind(&record.payload)
        .bind(Value::Object(record.context.clone()))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    #[tracing::instrument(skip(self, record), fields(key = %record.idempotency_key))]
    async fn create_if_absent(&self, record: OrchestrationRecord) -> Result<CreateOutcome> {
        if self.insert_record(&record).await? {
            return Ok(CreateOutcome::Created(record));
        }

        // Lost the race on the idempotency key; hand back the winner.
        self.find_by_idempotency_key(&record.idempotency_key)
            .await?
            .map(CreateOutcome::Existing)
            .ok_or(StoreError::IdempotencyConflict(record.idempotency_key))
    }

    async fn get(&self, id: OrchestrationId) -> Result<Option<OrchestrationRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM orchestrations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<OrchestrationRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM orchestrations WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn claim(
        &self,
        id: OrchestrationId,
        owner: &str,
        lease: Duration,
    ) -> Result<Option<Claim>> {
        let claim = Claim::new(id, owner, lease);
        let result = sqlx::query(
            r#"
            UPDATE orchestrations
            SET claimed_by = $2, claim_token = $3, lease_expires_at = $4
            WHERE id = $1
              AND state NOT IN ('COMPLETED', 'ROLLED_BACK')
              AND (lease_expires_at IS NULL OR lease_expires_at <= $5)
            "#,
        )
        .bind(id.as_uuid())
        .bind(&claim.owner)
        .bind(claim.token)
        .bind(claim.expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(Some(claim))
        } else {
            tracing::debug!(%id, "claim not acquired");
            Ok(None)
        }
    }

    async fn renew(&self, claim: &Claim) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE orchestrations
            SET lease_expires_at = $3
            WHERE id = $1 AND claim_token = $2 AND lease_expires_at > $4
            "#,
        )
        .bind(claim.orchestration_id.as_uuid())
        .bind(claim.token)
        .bind(lease_deadline(now, claim.lease))
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            metrics::counter!("record_store_claim_lost_total").increment(1);
            Err(StoreError::ClaimLost(claim.orchestration_id))
        }
    }

    async fn release(&self, claim: &Claim) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE orchestrations
            SET claimed_by = NULL, claim_token = NULL, lease_expires_at = NULL
            WHERE id = $1 AND claim_token = $2
            "#,
        )
        .bind(claim.orchestration_id.as_uuid())
        .bind(claim.token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, claim, transition), fields(id = %claim.orchestration_id, from = %transition.from, to = %transition.to))]
    async fn commit(&self, claim: &Claim, transition: Transition) -> Result<OrchestrationRecord> {
        let id = claim.orchestration_id;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS}, claim_token FROM orchestrations WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        let now = Utc::now();
        let token: Option<Uuid> = row.try_get("claim_token")?;
        let mut record = Self::row_to_record(&row)?;
        if token != Some(claim.token) || !record.has_live_lease(now) {
            metrics::counter!("record_store_claim_lost_total").increment(1);
            return Err(StoreError::ClaimLost(id));
        }

        let existing = Self::fetch_steps(&mut *tx, id).await?;
        validate_transition(&record, &transition, &existing)?;
        apply_transition(&mut record, &transition, claim.lease, now);

        sqlx::query(
            r#"
            UPDATE orchestrations
            SET state = $2, context = $3, error = $4, failed_step = $5, compensation_error = $6,
                updated_at = $7, completed_at = $8, lease_expires_at = $9
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(record.state.as_str())
        .bind(Value::Object(record.context.clone()))
        .bind(&record.error)
        .bind(record.failed_step.map(|s| s.as_str()))
        .bind(&record.compensation_error)
        .bind(record.updated_at)
        .bind(record.completed_at)
        .bind(record.lease_expires_at)
        .execute(&mut *tx)
        .await?;

        if let Some(step) = &transition.step_record {
            sqlx::query(
                r#"
                INSERT INTO step_records (id, orchestration_id, step, direction, status, input,
                                          output, error, attempts, started_at, completed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(step.id)
            .bind(step.orchestration_id.as_uuid())
            .bind(step.step.as_str())
            .bind(step.direction.as_str())
            .bind(step.status.as_str())
            .bind(&step.input)
            .bind(&step.output)
            .bind(&step.error)
            .bind(i32::try_from(step.attempts).unwrap_or(i32::MAX))
            .bind(step.started_at)
            .bind(step.completed_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && matches!(
                        db_err.constraint(),
                        Some("unique_forward_completion") | Some("unique_compensation")
                    )
                {
                    return StoreError::DuplicateStepRecord {
                        id,
                        step: step.step,
                        status: step.status,
                    };
                }
                StoreError::Database(e)
            })?;
        }

        tx.commit().await?;
        Ok(record)
    }

    async fn step_records(&self, id: OrchestrationId) -> Result<Vec<StepRecord>> {
        Self::fetch_steps(&self.pool, id).await
    }

    async fn find_stale(&self, query: StaleQuery) -> Result<Vec<OrchestrationRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM orchestrations
            WHERE state = ANY($1)
              AND updated_at < $2
              AND (lease_expires_at IS NULL OR lease_expires_at <= $3)
            ORDER BY updated_at ASC
            LIMIT $4
            "#
        ))
        .bind(query.state_names())
        .bind(query.updated_before)
        .bind(Utc::now())
        .bind(i64::try_from(query.limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn count_by_state(&self) -> Result<Vec<(OrchestrationState, u64)>> {
        let rows = sqlx::query(
            "SELECT state, COUNT(*) AS total FROM orchestrations GROUP BY state ORDER BY state",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let state = OrchestrationState::from_str(row.try_get("state")?)?;
                let total: i64 = row.try_get("total")?;
                Ok((state, total.max(0) as u64))
            })
            .collect()
    }
}

