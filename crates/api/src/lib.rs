//! HTTP intake server for the onboarding orchestrator.
//!
//! Accepts onboarding triggers, exposes orchestration status and step
//! history, and serves health and Prometheus metrics endpoints.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use record_store::RecordStore;
use saga::{
    Dispatcher, InMemoryDisasterRecovery, InMemoryIdentityFederation, InMemoryProvisioner,
    LoggingNotifier, RetryPolicy, SagaEngine, StepExecutor, StepRegistry,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::metrics::MetricsState;
use routes::onboarding::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: RecordStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get::<S>))
        .with_state(Arc::new(MetricsState {
            handle: metrics_handle,
            app: Arc::clone(&state),
        }));

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/onboarding", post(routes::onboarding::create::<S>))
        .route("/onboarding/{id}", get(routes::onboarding::get::<S>))
        .route("/onboarding/{id}/steps", get(routes::onboarding::steps::<S>))
        .route(
            "/onboarding/{id}/dispatch",
            post(routes::onboarding::dispatch::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Builds the saga engine over `store` with the given step registry.
pub fn create_engine<S: RecordStore + 'static>(
    store: S,
    registry: StepRegistry,
    config: &Config,
) -> Arc<SagaEngine<S>> {
    let executor = StepExecutor::new(registry)
        .with_forward_policy(config.retry)
        .with_compensation_policy(RetryPolicy {
            initial_backoff: config.retry.initial_backoff,
            jitter: config.retry.jitter,
            ..RetryPolicy::for_compensation()
        })
        .with_call_timeout(config.call_timeout);
    Arc::new(SagaEngine::new(
        store,
        executor,
        Arc::new(LoggingNotifier),
        config.engine_config(),
    ))
}

/// Creates application state with the in-memory collaborators.
pub fn create_default_state<S: RecordStore + 'static>(
    store: S,
    config: &Config,
) -> Arc<AppState<S>> {
    let registry = StepRegistry::onboarding(
        InMemoryIdentityFederation::new(),
        InMemoryProvisioner::new(),
        InMemoryDisasterRecovery::new(),
    );
    let engine = create_engine(store, registry, config);
    Arc::new(AppState::new(Dispatcher::new(engine)))
}
