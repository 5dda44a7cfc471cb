//! REST API Routes Module
//!
//! Includes:
//! - Value submission and result views
//! - Health check endpoints (Kubernetes-compatible)
//! - Prometheus metrics and the OpenAPI document
//! - CORS support and an origin allow-list for browser clients

pub mod health;
pub mod values;

use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;

use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

pub use health::create_router as health_router;

// ============================================================================
// OPENAPI ENDPOINT
// ============================================================================

/// Handler for /openapi.json endpoint.
async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

async fn not_found() -> ApiError {
    ApiError::not_found("No such route")
}

// ============================================================================
// ROUTER
// ============================================================================

/// Build the complete gateway router.
///
/// # Middleware Order (outer to inner)
/// 1. Observability - tracing and metrics, including rejected requests
/// 2. Origin guard - 403 for origins outside the allow-list
/// 3. CORS - preflight handling and response headers
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);
    let guard_config = Arc::clone(&state.config);

    let mut router = Router::new()
        .route("/values", post(values::submit_index))
        .route("/values/all", get(values::list_seen))
        .route("/values/current", get(values::list_current))
        .nest("/health", health::create_router())
        .route("/openapi.json", get(openapi_json));
    if state.config.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .fallback(not_found)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(from_fn(observability_middleware))
                .layer(from_fn_with_state(guard_config, origin_guard))
                .layer(cors),
        )
}

// ============================================================================
// ORIGIN GUARD
// ============================================================================

/// Reject browser requests from origins outside the allow-list.
///
/// Requests without an `Origin` header (curl, server-to-server) pass.
async fn origin_guard(
    State(config): State<Arc<ApiConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .map(|value| value.to_str().unwrap_or_default().to_string());

    if let Some(origin) = origin {
        if !config.is_origin_allowed(&origin) {
            tracing::debug!(origin = %origin, "Rejected cross-origin request");
            return ApiError::origin_not_allowed(&origin).into_response();
        }
    }

    next.run(request).await
}

// ============================================================================
// CORS LAYER
// ============================================================================

/// Build the CORS layer from ApiConfig.
///
/// In development mode (empty origins), allows all origins.
/// In production mode, only allows configured origins.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if !config.is_production() {
        tracing::info!("CORS: Development mode - allowing all origins");
        return cors.allow_origin(Any);
    }

    tracing::info!(
        "CORS: Production mode - allowing origins: {:?}",
        config.cors_origins
    );
    let exact: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter(|o| !o.starts_with("*."))
        .filter_map(|o| o.parse().ok())
        .collect();

    if exact.len() == config.cors_origins.len() {
        cors.allow_origin(exact)
    } else {
        // Wildcard subdomains need the predicate form.
        let config = config.clone();
        cors.allow_origin(tower_http::cors::AllowOrigin::predicate(
            move |origin: &HeaderValue, _| {
                origin
                    .to_str()
                    .map(|o| config.is_origin_allowed(o))
                    .unwrap_or(false)
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use fibwork_test_utils::fixtures::memory_stores;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app(config: ApiConfig) -> Router {
        let stores = memory_stores();
        create_router(AppState::new(
            stores.cache,
            stores.ledger,
            stores.channel,
            config,
        ))
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let response = app(ApiConfig::default())
            .oneshot(Request::builder().uri("/health/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"pong");
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let response = app(ApiConfig::default())
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_disallowed_origin_rejected() {
        let config = ApiConfig {
            cors_origins: vec!["https://fib.example.com".to_string()],
            ..ApiConfig::default()
        };
        let response = app(config)
            .oneshot(
                Request::builder()
                    .uri("/values/current")
                    .header(header::ORIGIN, "https://evil.example.org")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["code"], "ORIGIN_NOT_ALLOWED");
    }

    #[tokio::test]
    async fn test_allowed_and_missing_origin_pass() {
        let config = ApiConfig {
            cors_origins: vec!["https://fib.example.com".to_string()],
            ..ApiConfig::default()
        };
        let router = app(config);

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/values/current")
                    .header(header::ORIGIN, "https://fib.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&HeaderValue::from_static("https://fib.example.com"))
        );

        let response = router
            .oneshot(Request::builder().uri("/values/current").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_openapi_served() {
        let response = app(ApiConfig::default())
            .oneshot(Request::builder().uri("/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let doc = json_body(response).await;
        assert!(doc["paths"]["/values"].is_object());
    }

    #[tokio::test]
    async fn test_metrics_served() {
        let response = app(ApiConfig::default())
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_disabled_is_not_found() {
        let config = ApiConfig {
            metrics_enabled: false,
            ..ApiConfig::default()
        };
        let response = app(config)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
