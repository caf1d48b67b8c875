//! Prometheus metrics endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use record_store::RecordStore;

use super::onboarding::AppState;

/// State of the metrics route: the exporter handle plus the record store
/// whose per-state counts are published as gauges.
pub struct MetricsState<S: RecordStore> {
    pub handle: PrometheusHandle,
    pub app: Arc<AppState<S>>,
}

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn get<S: RecordStore + 'static>(
    State(state): State<Arc<MetricsState<S>>>,
) -> impl IntoResponse {
    match state.app.engine().store().count_by_state().await {
        Ok(counts) => {
            for (orchestration_state, count) in counts {
                metrics::gauge!("saga_orchestrations", "state" => orchestration_state.as_str())
                    .set(count as f64);
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to refresh orchestration gauges"),
    }

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.handle.render(),
    )
}
