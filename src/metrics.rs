//! Prometheus metrics for picvault.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a Tower-compatible middleware for
//! HTTP RED metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "picvault_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "picvault_http_request_duration_seconds";

/// Upload attempts (counter). Labels: status (`success` or `error`).
pub const UPLOADS_TOTAL: &str = "picvault_uploads_total";

/// Bytes written to object storage by successful uploads (counter).
pub const UPLOAD_BYTES_TOTAL: &str = "picvault_upload_bytes_total";

/// Signed URLs minted (counter). Labels: operation (`upload`, `view`, `compressed`).
pub const URLS_SIGNED_TOTAL: &str = "picvault_urls_signed_total";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests).
pub fn init_metrics() -> anyhow::Result<&'static PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(UPLOADS_TOTAL, "Image uploads by outcome");
    describe_counter!(UPLOAD_BYTES_TOTAL, "Bytes stored by successful uploads");
    describe_counter!(URLS_SIGNED_TOTAL, "Signed read URLs by operation");
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation.
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

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path, "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Map a request path to a route template for metric labels, so record
/// ids and static file names do not create one series each.
///
/// - `/api/images/view-image/65a1...` -> `/api/images/view-image/{id}`
/// - `/objects/picvault/images/...` -> `/objects/{key}`
/// - `/logo.png` -> `/{static}`
fn normalize_path(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/openapi.json" => "/openapi.json",
        "/metrics" => "/metrics",
        "/api/images/upload" => "/api/images/upload",
        _ if path.starts_with("/api/images/view-image/") => "/api/images/view-image/{id}",
        _ if path.starts_with("/api/") => "/api/{unknown}",
        _ if path.starts_with("/objects/") => "/objects/{key}",
        _ => "/{static}",
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

// -- Tests --------------------------------------------------------------------
