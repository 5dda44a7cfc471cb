//! Health Check Endpoints
//!
//! Provides Kubernetes-compatible health check endpoints:
//! - /health/ping - Simple liveness check
//! - /health/ready - Ledger and Result Cache connectivity check
//! - /health/live - Process alive check

use std::future::Future;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use fibwork_core::StoreError;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthDetails {
    pub ledger: ComponentHealth,
    pub cache: ComponentHealth,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health/ping - Simple pong response
#[utoipa::path(
    get,
    path = "/health/ping",
    tag = "Health",
    responses(
        (status = 200, description = "Service is responding", body = String),
    ),
)]
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/live - Process liveness check
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Process is alive", body = HealthResponse),
    ),
)]
pub async fn liveness() -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Process is alive".to_string()),
        details: None,
    };
    (StatusCode::OK, Json(response))
}

/// GET /health/ready - Readiness check (Ledger and Result Cache)
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse),
        (status = 503, description = "Service is not ready", body = HealthResponse),
    ),
)]
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let (ledger, cache) = tokio::join!(
        probe(None, state.ledger.ping()),
        probe(Some(state.cache.backend_name()), state.cache.ping()),
    );

    let overall_status =
        if ledger.status == HealthStatus::Healthy && cache.status == HealthStatus::Healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

    let response = HealthResponse {
        status: overall_status,
        message: None,
        details: Some(HealthDetails {
            ledger,
            cache,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
        }),
    };

    let status_code = if overall_status == HealthStatus::Healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}

async fn probe(
    backend: Option<&str>,
    check: impl Future<Output = Result<(), StoreError>>,
) -> ComponentHealth {
    let start = Instant::now();
    let backend = backend.map(str::to_string);

    match check.await {
        Ok(()) => ComponentHealth {
            status: HealthStatus::Healthy,
            backend,
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Readiness probe failed");
            ComponentHealth {
                status: HealthStatus::Unhealthy,
                backend,
                latency_ms: None,
                error: Some(probe_error_summary(&e).to_string()),
            }
        }
    }
}

/// Public wording for a failed probe; the full error is only logged.
fn probe_error_summary(err: &StoreError) -> &'static str {
    match err {
        StoreError::PoolExhausted { .. } => "Connection pool exhausted",
        StoreError::Unavailable { .. } => "Store unavailable",
        _ => "Store check failed",
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create health check router.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: HealthStatus::Healthy,
            message: Some("Process is alive".to_string()),
            details: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "healthy");
        assert!(json.get("details").is_none());
    }

    #[tokio::test]
    async fn test_probe_reports_failure() {
        let health = probe(Some("memory"), async {
            Err(StoreError::Unavailable {
                reason: "down".to_string(),
            })
        })
        .await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!(health.latency_ms.is_none());
        assert_eq!(health.error.as_deref(), Some("Store unavailable"));
    }

    #[tokio::test]
    async fn test_probe_error_hides_query_details() {
        let health = probe(Some("postgres"), async {
            Err(StoreError::QueryFailed {
                store: "ledger",
                reason: "relation \"seen_indexes\" does not exist".to_string(),
            })
        })
        .await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.error.as_deref(), Some("Store check failed"));
    }
}
