//! Prometheus metrics for s3gate.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides the HTTP RED middleware and
//! exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

use crate::context::ApiMethod;
use crate::errors::S3Error;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "s3gate_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "s3gate_http_request_duration_seconds";

/// Dispatched S3 operations (counter). Labels: operation, status.
pub const S3_OPERATIONS_TOTAL: &str = "s3gate_s3_operations_total";

/// Failed authorization checks (counter). Labels: phase.
pub const AUTH_FAILURES_TOTAL: &str = "s3gate_auth_failures_total";

/// Payload bytes accepted by object and part writes (counter).
pub const BYTES_RECEIVED_TOTAL: &str = "s3gate_bytes_received_total";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder. Idempotent.
///
/// Returns `None` when another recorder already owns the process (the
/// counters then go to that recorder and `/metrics` reports unavailable).
pub fn init_metrics() -> Option<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Some(handle);
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(PROMETHEUS_HANDLE.get_or_init(|| handle)),
        Err(err) => {
            warn!(error = %err, "prometheus recorder not installed");
            PROMETHEUS_HANDLE.get()
        }
    }
}

/// Register metric descriptions. Call once after [`init_metrics`].
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(S3_OPERATIONS_TOTAL, "Dispatched S3 operations by type and outcome");
    describe_counter!(AUTH_FAILURES_TOTAL, "Failed authorization checks by phase");
    describe_counter!(BYTES_RECEIVED_TOTAL, "Payload bytes accepted by writes");
}

// -- Recording helpers --------------------------------------------------------

/// Count one dispatched operation; `status` is `ok` or the S3 error code.
pub fn record_operation<T>(operation: ApiMethod, result: &Result<T, S3Error>) {
    let status = match result {
        Ok(_) => "ok",
        Err(err) => err.code(),
    };
    counter!(S3_OPERATIONS_TOTAL, "operation" => operation.as_str(), "status" => status)
        .increment(1);
}

/// Count one failed authorization; `phase` is `request`, `copy_get` or `copy_put`.
pub fn record_auth_failure(phase: &'static str) {
    counter!(AUTH_FAILURES_TOTAL, "phase" => phase).increment(1);
}

pub fn record_bytes_received(bytes: u64) {
    counter!(BYTES_RECEIVED_TOTAL).increment(bytes);
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// `/metrics` itself is not instrumented.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

/// Collapse a request path to its route template so bucket and key names
/// never become label values.
fn normalize_path(path: &str) -> String {
    match path {
        "/" | "/health" | "/openapi.json" | "/metrics" => path.to_string(),
        _ => {
            let trimmed = path.trim_start_matches('/');
            if trimmed.is_empty() {
                "/".to_string()
            } else if trimmed.contains('/') {
                "/{bucket}/{key}".to_string()
            } else {
                "/{bucket}".to_string()
            }
        }
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Prometheus exposition format.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}
