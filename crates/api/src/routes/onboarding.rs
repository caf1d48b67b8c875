//! Onboarding trigger and status endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use common::{OrchestrationId, OrchestrationState, StepKind, WorkflowType};
use domain::OnboardingRequest;
use record_store::{OrchestrationRecord, RecordStore, StepRecord};
use saga::{Dispatcher, IntakeReceipt, SagaEngine};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ApiError;

/// Header carrying the caller's delivery identifier. Duplicate detection
/// stays keyed on the tenant.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Shared application state accessible from all handlers.
pub struct AppState<S: RecordStore> {
    pub dispatcher: Dispatcher<S>,
}

impl<S: RecordStore + 'static> AppState<S> {
    pub fn new(dispatcher: Dispatcher<S>) -> Self {
        Self { dispatcher }
    }

    pub fn engine(&self) -> &Arc<SagaEngine<S>> {
        self.dispatcher.engine()
    }
}

// -- Response types --

#[derive(Serialize)]
pub struct OrchestrationResponse {
    pub id: OrchestrationId,
    pub workflow_type: WorkflowType,
    pub idempotency_key: String,
    pub delivery_key: Option<String>,
    pub state: OrchestrationState,
    pub context: Map<String, Value>,
    pub error: Option<String>,
    pub failed_step: Option<StepKind>,
    pub compensation_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<OrchestrationRecord> for OrchestrationResponse {
    fn from(record: OrchestrationRecord) -> Self {
        Self {
            id: record.id,
            workflow_type: record.workflow_type,
            idempotency_key: record.idempotency_key,
            delivery_key: record.delivery_key,
            state: record.state,
            context: record.context,
            error: record.error,
            failed_step: record.failed_step,
            compensation_error: record.compensation_error,
            created_at: record.created_at,
            updated_at: record.updated_at,
            completed_at: record.completed_at,
        }
    }
}

// -- Handlers --

/// POST /onboarding: accept an onboarding trigger.
///
/// Answers `202` for a new orchestration and `200` when the trigger matches
/// an existing one. Any `Idempotency-Key` header is recorded as the
/// delivery key; it never splits one tenant into two orchestrations.
#[tracing::instrument(skip(state, headers, request))]
pub async fn create<S: RecordStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(request): Json<OnboardingRequest>,
) -> Result<(StatusCode, Json<IntakeReceipt>), ApiError> {
    let delivery_key = match headers.get(IDEMPOTENCY_KEY_HEADER) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| ApiError::BadRequest("Idempotency-Key is not valid ASCII".into()))?
                .to_string(),
        ),
        None => None,
    };

    let receipt = state.dispatcher.intake(request, delivery_key).await?;
    let status = if receipt.duplicate {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(receipt)))
}

/// GET /onboarding/:id: current state of an orchestration.
#[tracing::instrument(skip(state))]
pub async fn get<S: RecordStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrchestrationResponse>, ApiError> {
    let id = parse_orchestration_id(&id)?;
    let record = state.engine().get(id).await?;
    Ok(Json(record.into()))
}

/// GET /onboarding/:id/steps: step log in execution order.
#[tracing::instrument(skip(state))]
pub async fn steps<S: RecordStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<StepRecord>>, ApiError> {
    let id = parse_orchestration_id(&id)?;
    Ok(Json(state.engine().history(id).await?))
}

/// POST /onboarding/:id/dispatch: operator re-dispatch of a stuck record.
///
/// Terminal records are returned unchanged with `200`.
#[tracing::instrument(skip(state))]
pub async fn dispatch<S: RecordStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<OrchestrationResponse>), ApiError> {
    let id = parse_orchestration_id(&id)?;
    let record = state.dispatcher.redispatch(id).await?;
    let status = if record.state.is_terminal() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(record.into())))
}

fn parse_orchestration_id(id: &str) -> Result<OrchestrationId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(OrchestrationId::from_uuid(uuid))
}
