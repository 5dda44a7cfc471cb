//! Values REST API Routes
//!
//! Submission of Fibonacci indexes and the two read views: the Ledger of
//! every index ever seen and the Result Cache of placeholders and values.

use axum::{body::Bytes, extract::State, http::StatusCode, response::IntoResponse, Json};
use fibwork_core::{Index, ResultMap, Timestamp, PLACEHOLDER};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::DispatchMode,
    error::{ApiError, ApiResult},
    state::AppState,
    telemetry::metrics,
    validation::validate_index,
};

// ============================================================================
// TYPES
// ============================================================================

/// Body of `POST /values`.
///
/// Documentation only: the handler reads the raw body so that a missing or
/// mistyped `index` is classified by the validation rules rather than by the
/// JSON extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SubmitIndexRequest {
    /// JSON number or numeric string
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub index: Value,
}

/// Body of a successful `POST /values`.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SubmitIndexResponse {
    pub working: bool,
    #[cfg_attr(feature = "openapi", schema(value_type = u32))]
    pub index: Index,
}

/// One row of `GET /values/all`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SeenIndex {
    pub number: u32,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = DateTime))]
    pub created_at: Timestamp,
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /values/all - Every index ever submitted, ascending
#[utoipa::path(
    get,
    path = "/values/all",
    tag = "Values",
    responses(
        (status = 200, description = "Seen indexes ordered by number", body = Vec<SeenIndex>),
        (status = 500, description = "Ledger failure", body = ApiError),
        (status = 503, description = "Ledger unavailable", body = ApiError),
    ),
)]
pub async fn list_seen(State(state): State<AppState>) -> ApiResult<Json<Vec<SeenIndex>>> {
    let entries = state
        .ledger
        .list_ordered()
        .await
        .map_err(ApiError::from_ledger)?;

    Ok(Json(
        entries
            .into_iter()
            .map(|entry| SeenIndex {
                number: entry.number,
                created_at: entry.created_at,
            })
            .collect(),
    ))
}

/// GET /values/current - Placeholders and computed values by index
#[utoipa::path(
    get,
    path = "/values/current",
    tag = "Values",
    responses(
        (status = 200, description = "Result Cache contents", body = std::collections::BTreeMap<String, String>),
        (status = 500, description = "Result Cache failure", body = ApiError),
        (status = 503, description = "Result Cache unavailable", body = ApiError),
    ),
)]
pub async fn list_current(State(state): State<AppState>) -> ApiResult<Json<ResultMap>> {
    let values = state
        .cache
        .get_all()
        .await
        .map_err(ApiError::from_cache)?;
    Ok(Json(values))
}

/// POST /values - Submit an index for computation
#[utoipa::path(
    post,
    path = "/values",
    tag = "Values",
    request_body = SubmitIndexRequest,
    responses(
        (status = 201, description = "Index accepted", body = SubmitIndexResponse),
        (status = 400, description = "Missing, malformed, or non-integer index", body = ApiError),
        (status = 422, description = "Index out of range", body = ApiError),
        (status = 500, description = "Store failure", body = ApiError),
        (status = 503, description = "Store unavailable", body = ApiError),
    ),
)]
pub async fn submit_index(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let result = accept(&state, &body).await;

    if let Some(metrics) = metrics() {
        match &result {
            Ok(_) => metrics.record_submission("accepted"),
            Err(e) => metrics.record_submission(e.code.as_str()),
        }
    }

    let index = result?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitIndexResponse {
            working: true,
            index,
        }),
    ))
}

async fn accept(state: &AppState, body: &[u8]) -> ApiResult<Index> {
    let raw = index_field(body)?;
    let index = validate_index(raw.as_ref(), state.policy())?;
    let key = index.as_key();

    state
        .cache
        .set(&key, PLACEHOLDER)
        .await
        .map_err(ApiError::from_cache)?;

    match state.dispatch_mode() {
        DispatchMode::Direct => {
            publish_direct(state, &key).await;
            let inserted = state
                .ledger
                .insert_if_absent(index)
                .await
                .map_err(ApiError::from_ledger)?;
            tracing::debug!(index = %index, inserted, "Submission dispatched");
        }
        DispatchMode::Outbox => {
            let job_id = state
                .ledger
                .insert_with_job(index)
                .await
                .map_err(ApiError::from_ledger)?;
            tracing::debug!(index = %index, job_id, "Submission queued in outbox");
        }
    }

    Ok(index)
}

/// Publish failures are logged and counted; the submission still succeeds.
async fn publish_direct(state: &AppState, key: &str) {
    let outcome = state.channel.publish(state.topic(), key).await;
    if let Some(metrics) = metrics() {
        metrics.record_publish("direct", outcome.is_ok());
    }
    if let Err(e) = outcome {
        tracing::warn!(index = key, error = %e, "Failed to publish index");
    }
}

/// Pull `index` out of a JSON object body.
///
/// An empty body or a JSON value that is not an object carries no index.
fn index_field(body: &[u8]) -> ApiResult<Option<Value>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value: Value = serde_json::from_slice(body)?;
    Ok(match value {
        Value::Object(mut fields) => fields.remove("index"),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_index_field_extraction() {
        assert_eq!(index_field(b"").unwrap(), None);
        assert_eq!(index_field(b"  \n").unwrap(), None);
        assert_eq!(index_field(b"{}").unwrap(), None);
        assert_eq!(index_field(b"[7]").unwrap(), None);
        assert_eq!(index_field(br#"{"index": 7}"#).unwrap(), Some(json!(7)));
        assert_eq!(index_field(br#"{"index": "7"}"#).unwrap(), Some(json!("7")));
    }

    #[test]
    fn test_invalid_json_is_invalid_input() {
        let err = index_field(b"{index:").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidInput);
    }

    #[test]
    fn test_submit_response_shape() {
        let body = SubmitIndexResponse {
            working: true,
            index: fibwork_test_utils::fixtures::index(7),
        };
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({ "working": true, "index": 7 })
        );
    }
}
