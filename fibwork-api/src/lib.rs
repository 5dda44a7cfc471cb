//! fibwork API - HTTP Gateway
//!
//! Accepts Fibonacci index submissions, records them in the Durable Ledger,
//! writes placeholders to the Result Cache, and hands the work to the
//! Compute Worker over the Event Channel, either directly or through the
//! transactional outbox and its relay.

pub mod config;
pub mod error;
pub mod jobs;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod validation;

// Re-export commonly used types
pub use config::{ApiConfig, DispatchMode};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use openapi::ApiDoc;
pub use routes::create_router;
pub use state::AppState;
pub use validation::validate_index;
