//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use fibwork_core::IndexPolicy;
use fibwork_storage::{EventChannel, Ledger, ResultCache};

use crate::config::{ApiConfig, DispatchMode};

/// Application-wide state shared across all routes.
///
/// Store handles are trait objects so tests can swap in the in-memory
/// backends or failing doubles.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<dyn ResultCache>,
    pub ledger: Arc<dyn Ledger>,
    pub channel: Arc<dyn EventChannel>,
    pub config: Arc<ApiConfig>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        cache: Arc<dyn ResultCache>,
        ledger: Arc<dyn Ledger>,
        channel: Arc<dyn EventChannel>,
        config: ApiConfig,
    ) -> Self {
        Self {
            cache,
            ledger,
            channel,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    pub fn policy(&self) -> &IndexPolicy {
        &self.config.policy
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        self.config.dispatch_mode
    }
}
