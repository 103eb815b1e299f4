use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderValue, Method, StatusCode},
    routing::get,
    Json, Router,
};
use lifecycle::{Orchestrator, OrchestratorState};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::health::HealthReport;
use crate::processor::{SensorStore, SensorSummary};
use crate::prometheus::setup_metrics_routes;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub store: SensorStore,
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct ApiInfo {
    pub name: String,
    pub version: String,
    pub environment: String,
    pub docs: &'static str,
    pub health: &'static str,
}

async fn index(State(state): State<AppState>) -> Json<ApiInfo> {
    let options = state.orchestrator.options();
    Json(ApiInfo {
        name: state.title,
        version: options.version.clone(),
        environment: options.environment.clone(),
        docs: "/docs",
        health: "/health",
    })
}

async fn health(State(state): State<AppState>) -> HealthReport {
    state.orchestrator.health().into()
}

async fn liveness() -> &'static str {
    "ok"
}

async fn readiness(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.orchestrator.state() {
        OrchestratorState::Running => (StatusCode::OK, "ready"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "not ready"),
    }
}

async fn sensors(State(state): State<AppState>) -> Json<Vec<SensorSummary>> {
    Json(state.store.summaries())
}

/// Origins that are not valid header values are logged and skipped.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .allow_origin(AllowOrigin::list(origins))
}

/// Read-only HTTP surface: nothing here can start or stop the orchestrator.
/// Pass a recorder handle to expose `/metrics`; tests leave it out because a
/// global recorder can only be installed once per process.
pub fn router(
    state: AppState,
    cors_origins: &[String],
    metrics: Option<PrometheusHandle>,
) -> Router {
    let router = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/_liveness", get(liveness))
        .route("/_readiness", get(readiness))
        .route("/api/v1/sensors", get(sensors))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state);

    match metrics {
        Some(recorder_handle) => setup_metrics_routes(router, recorder_handle),
        None => router,
    }
}
