// prometheus exporter setup

use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics::counter;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

use crate::reading::SensorKind;

pub const SENSOR_READINGS_EMITTED_TOTAL: &str = "sensor_readings_emitted_total";
pub const SENSOR_READINGS_FAILED_TOTAL: &str = "sensor_readings_failed_total";
pub const PROCESSOR_READINGS_PROCESSED_TOTAL: &str = "processor_readings_processed_total";

pub fn report_emitted_reading(kind: SensorKind) {
    counter!(SENSOR_READINGS_EMITTED_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// `cause` is one of `sensor_failure`, `channel_full` or `channel_closed`.
pub fn report_failed_reading(kind: SensorKind, cause: &'static str) {
    counter!(SENSOR_READINGS_FAILED_TOTAL, "kind" => kind.as_str(), "cause" => cause)
        .increment(1);
}

pub fn report_processed_reading(kind: SensorKind) {
    counter!(PROCESSOR_READINGS_PROCESSED_TOTAL, "kind" => kind.as_str()).increment(1);
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("_duration_seconds".to_string()),
            EXPONENTIAL_SECONDS,
        )?
        .install_recorder()
}

/// Add the prometheus endpoint and middleware to a router, should be called last.
pub fn setup_metrics_routes(router: Router, recorder_handle: PrometheusHandle) -> Router {
    router
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics))
}

/// Middleware to record some common HTTP metrics
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}
