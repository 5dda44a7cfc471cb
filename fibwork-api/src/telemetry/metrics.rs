//! Prometheus Metrics Definitions
//!
//! Defines all fibwork gateway metrics with appropriate labels and types.
//! Exposes a /metrics endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<FibworkMetrics>> = Lazy::new(FibworkMetrics::new);

/// The registered metrics, or `None` if registration failed (already logged).
pub fn metrics() -> Option<&'static FibworkMetrics> {
    METRICS.as_ref().ok()
}

/// Container for all gateway metrics.
#[derive(Clone)]
pub struct FibworkMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Submissions by outcome - labels: outcome (accepted, or an error code)
    pub submissions_total: CounterVec,

    /// Event Channel publishes - labels: source (direct, relay), status
    pub publishes_total: CounterVec,

    /// Worker computations in the embedded worker - labels: outcome
    pub jobs_computed_total: CounterVec,

    /// Outbox relay activity - labels: event (relayed, failed, cycle)
    pub relay_events_total: CounterVec,
}

fn registration_failed(name: &str, e: prometheus::Error) -> ApiError {
    tracing::error!(metric = name, error = %e, "Failed to register metric");
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

impl FibworkMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "fibwork_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| registration_failed("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "fibwork_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_failed("http_request_duration_seconds", e))?,

            submissions_total: register_counter_vec!(
                "fibwork_submissions_total",
                "Index submissions by outcome",
                &["outcome"]
            )
            .map_err(|e| registration_failed("submissions_total", e))?,

            publishes_total: register_counter_vec!(
                "fibwork_channel_publishes_total",
                "Event Channel publishes by source and status",
                &["source", "status"]
            )
            .map_err(|e| registration_failed("channel_publishes_total", e))?,

            jobs_computed_total: register_counter_vec!(
                "fibwork_jobs_computed_total",
                "Jobs handled by the embedded worker by outcome",
                &["outcome"]
            )
            .map_err(|e| registration_failed("jobs_computed_total", e))?,

            relay_events_total: register_counter_vec!(
                "fibwork_relay_events_total",
                "Outbox relay activity",
                &["event"]
            )
            .map_err(|e| registration_failed("relay_events_total", e))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record a submission outcome.
    pub fn record_submission(&self, outcome: &str) {
        self.submissions_total.with_label_values(&[outcome]).inc();
    }

    /// Record a publish attempt.
    pub fn record_publish(&self, source: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        self.publishes_total
            .with_label_values(&[source, status])
            .inc();
    }

    /// Add worker outcomes observed since the last call.
    pub fn record_jobs(&self, outcome: &str, count: u64) {
        self.jobs_computed_total
            .with_label_values(&[outcome])
            .inc_by(count as f64);
    }

    /// Record relay activity.
    pub fn record_relay(&self, event: &str, count: u64) {
        self.relay_events_total
            .with_label_values(&[event])
            .inc_by(count as f64);
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Observability",
    responses(
        (status = 200, description = "Prometheus metrics in text format", content_type = "text/plain"),
        (status = 500, description = "Failed to encode metrics"),
    ),
)]
pub async fn metrics_handler() -> impl IntoResponse {
    // Touch the registry so the families exist before the first request.
    let _ = metrics();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
