//! Error Types for fibwork API
//!
//! This module defines error handling for the gateway:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fibwork_core::{ChannelError, ConfigError, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code. Validation codes are
/// distinct per failure so clients can tell "too small" from "too large".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400, 422)
    // ========================================================================
    /// `index` is absent, null, or empty
    MissingIndex,

    /// `index` has no leading base-10 integer
    MalformedIndex,

    /// `index` is negative
    IndexTooSmall,

    /// `index` exceeds the configured maximum
    IndexTooLarge,

    /// `index` has a fractional part or trailing characters
    NotAnInteger,

    /// Request body is not valid JSON
    InvalidInput,

    // ========================================================================
    // Access Errors (403, 404)
    // ========================================================================
    /// Cross-origin request from an origin outside the allow-list
    OriginNotAllowed,

    /// No route matches the request
    NotFound,

    // ========================================================================
    // Server Errors (500, 503)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Ledger operation failed
    DatabaseError,

    /// Result Cache operation failed
    CacheError,

    /// Service is temporarily unavailable
    ServiceUnavailable,

    /// Database connection pool exhausted
    ConnectionPoolExhausted,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::MissingIndex
            | ErrorCode::MalformedIndex
            | ErrorCode::NotAnInteger
            | ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,

            ErrorCode::IndexTooSmall | ErrorCode::IndexTooLarge => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            ErrorCode::OriginNotAllowed => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,

            ErrorCode::ServiceUnavailable | ErrorCode::ConnectionPoolExhausted => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            ErrorCode::InternalError | ErrorCode::DatabaseError | ErrorCode::CacheError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::MissingIndex => "Field 'index' is required",
            ErrorCode::MalformedIndex => "Field 'index' must be an integer",
            ErrorCode::IndexTooSmall => "Index must not be negative",
            ErrorCode::IndexTooLarge => "Index is too high",
            ErrorCode::NotAnInteger => "Index must be a whole number",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::OriginNotAllowed => "Origin not allowed",
            ErrorCode::NotFound => "Not found",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::CacheError => "Result cache operation failed",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::ConnectionPoolExhausted => "Connection pool exhausted",
        }
    }

    /// Wire name, as serialized in error bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingIndex => "MISSING_INDEX",
            ErrorCode::MalformedIndex => "MALFORMED_INDEX",
            ErrorCode::IndexTooSmall => "INDEX_TOO_SMALL",
            ErrorCode::IndexTooLarge => "INDEX_TOO_LARGE",
            ErrorCode::NotAnInteger => "NOT_AN_INTEGER",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::OriginNotAllowed => "ORIGIN_NOT_ALLOWED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::CacheError => "CACHE_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::ConnectionPoolExhausted => "CONNECTION_POOL_EXHAUSTED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (offending value, bounds)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            details: None,
        }
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors
    // ========================================================================

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn origin_not_allowed(origin: &str) -> Self {
        Self::new(
            ErrorCode::OriginNotAllowed,
            format!("Origin '{}' is not allowed", origin),
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    pub fn cache_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CacheError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn connection_pool_exhausted() -> Self {
        Self::from_code(ErrorCode::ConnectionPoolExhausted)
    }

    /// Map a Ledger failure. Details are logged, not returned.
    pub fn from_ledger(err: StoreError) -> Self {
        Self::from_store(err, ErrorCode::DatabaseError)
    }

    /// Map a Result Cache failure. Details are logged, not returned.
    pub fn from_cache(err: StoreError) -> Self {
        Self::from_store(err, ErrorCode::CacheError)
    }

    fn from_store(err: StoreError, failure: ErrorCode) -> Self {
        tracing::error!(error = %err, "Store operation failed");
        match err {
            StoreError::PoolExhausted { .. } => Self::connection_pool_exhausted(),
            StoreError::Unavailable { .. } => {
                Self::service_unavailable(ErrorCode::ServiceUnavailable.default_message())
            }
            _ => Self::from_code(failure),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM STANDARD ERRORS
// ============================================================================

/// Ledger is the default owner of a bare `StoreError`; cache call sites use
/// [`ApiError::from_cache`].
impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::from_ledger(err)
    }
}

impl From<ChannelError> for ApiError {
    fn from(err: ChannelError) -> Self {
        tracing::error!("Event channel error: {}", err);
        ApiError::service_unavailable("Event channel unavailable")
    }
}

impl From<fibwork_worker::WorkerError> for ApiError {
    fn from(err: fibwork_worker::WorkerError) -> Self {
        use fibwork_worker::WorkerError;
        match err {
            WorkerError::Channel(e) => e.into(),
            WorkerError::Store(e) => ApiError::from_cache(e),
            WorkerError::Config(e) => e.into(),
            other => {
                tracing::error!(error = %other, "Embedded worker failed");
                ApiError::internal_error("Embedded worker failed")
            }
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::internal_error(format!("Configuration error: {}", err))
    }
}

/// Convert from serde_json::Error to ApiError.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::debug!("JSON deserialization error: {:?}", err);
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::MissingIndex.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::MalformedIndex.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::NotAnInteger.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ErrorCode::IndexTooSmall.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ErrorCode::IndexTooLarge.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ErrorCode::OriginNotAllowed.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ErrorCode::DatabaseError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ErrorCode::ConnectionPoolExhausted.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_store_errors_map_by_kind() {
        let err = ApiError::from_ledger(StoreError::PoolExhausted {
            waited: Duration::from_secs(30),
        });
        assert_eq!(err.code, ErrorCode::ConnectionPoolExhausted);

        let err = ApiError::from_cache(StoreError::QueryFailed {
            store: "cache",
            reason: "relation \"fib_results\" does not exist".to_string(),
        });
        assert_eq!(err.code, ErrorCode::CacheError);
        assert!(!err.message.contains("fib_results"));

        let err: ApiError = StoreError::Unavailable {
            reason: "pool closed".to_string(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::ServiceUnavailable);
    }

    #[test]
    fn test_api_error_with_details() {
        let details = serde_json::json!({ "index": 41, "max": 40 });
        let err = ApiError::from_code(ErrorCode::IndexTooLarge).with_details(details.clone());

        assert_eq!(err.code, ErrorCode::IndexTooLarge);
        assert_eq!(err.details, Some(details));
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::from_code(ErrorCode::IndexTooSmall);
        let json = serde_json::to_string(&err)?;

        assert!(json.contains("INDEX_TOO_SMALL"));
        assert!(!json.contains("details"));

        let deserialized: ApiError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }

    #[test]
    fn test_wire_names_match_serde() -> Result<(), serde_json::Error> {
        for code in [
            ErrorCode::MissingIndex,
            ErrorCode::IndexTooLarge,
            ErrorCode::NotAnInteger,
            ErrorCode::ConnectionPoolExhausted,
        ] {
            assert_eq!(serde_json::to_value(code)?, code.as_str());
        }
        Ok(())
    }

    #[test]
    fn test_error_display() {
        let err = ApiError::database_error("Connection failed");
        let display = format!("{}", err);

        assert!(display.contains("DatabaseError"));
        assert!(display.contains("Connection failed"));
    }
}
