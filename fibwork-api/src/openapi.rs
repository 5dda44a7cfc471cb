//! OpenAPI Specification for the fibwork gateway
//!
//! Generated by utoipa from the route annotations and response types.

use utoipa::OpenApi;

use crate::error::{ApiError, ErrorCode};
use crate::routes::health::{self, ComponentHealth, HealthDetails, HealthResponse, HealthStatus};
use crate::routes::values::{self, SeenIndex, SubmitIndexRequest, SubmitIndexResponse};
use crate::telemetry::metrics;

/// OpenAPI document for the fibwork gateway.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "fibwork API",
        version = "0.1.0",
        description = "Submit Fibonacci indexes and read computed results",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:5000", description = "Local Development")
    ),
    tags(
        (name = "Values", description = "Index submission and result views"),
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Observability", description = "Prometheus metrics")
    ),
    paths(
        values::list_seen,
        values::list_current,
        values::submit_index,
        health::ping,
        health::liveness,
        health::readiness,
        metrics::metrics_handler,
    ),
    components(
        schemas(
            ApiError, ErrorCode,
            SeenIndex, SubmitIndexRequest, SubmitIndexResponse,
            HealthResponse, HealthStatus, HealthDetails, ComponentHealth,
        )
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Render the OpenAPI document as pretty JSON.
    pub fn to_json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::openapi())
    }
}
