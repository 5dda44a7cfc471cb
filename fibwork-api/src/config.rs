//! API Configuration Module
//!
//! CORS, index policy, dispatch mode, and shutdown settings for the gateway.
//! Configuration is loaded from environment variables with defaults suited to
//! development.

use std::str::FromStr;
use std::time::Duration;

use fibwork_core::{ConfigError, IndexPolicy, DEFAULT_MAX_INDEX, DEFAULT_TOPIC};
use fibwork_storage::{ChannelBackend, StorageConfig};
use fibwork_worker::WorkerConfig;

// ============================================================================
// DISPATCH MODE
// ============================================================================

/// How an accepted submission reaches the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Placeholder, publish, ledger insert: three independent writes.
    #[default]
    Direct,
    /// Placeholder, then ledger row and outbox job in one transaction; the
    /// relay publishes.
    Outbox,
}

impl FromStr for DispatchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "outbox" => Ok(Self::Outbox),
            _ => Err(ConfigError::InvalidValue {
                field: "dispatch_mode".to_string(),
                value: s.to_string(),
                reason: "expected direct or outbox".to_string(),
            }),
        }
    }
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    /// Example: "https://fib.example.com,https://admin.fib.example.com"
    pub cors_origins: Vec<String>,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Pipeline Configuration
    // ========================================================================
    /// Accepted index range.
    pub policy: IndexPolicy,

    /// Event Channel topic.
    pub topic: String,

    /// How accepted submissions are dispatched.
    pub dispatch_mode: DispatchMode,

    /// Run the compute worker inside the gateway process.
    pub embedded_worker: bool,

    /// Hard deadline for draining on shutdown.
    pub shutdown_grace: Duration,

    // ========================================================================
    // Observability
    // ========================================================================
    /// Serve Prometheus metrics at /metrics.
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(), // Empty = allow all
            cors_max_age_secs: 86400, // 24 hours
            policy: IndexPolicy::default(),
            topic: DEFAULT_TOPIC.to_string(),
            dispatch_mode: DispatchMode::default(),
            embedded_worker: false,
            shutdown_grace: Duration::from_secs(10),
            metrics_enabled: true,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `FIBWORK_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `FIBWORK_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `FIBWORK_MAX_INDEX`: Largest accepted index (default: 40, at most 92)
    /// - `FIBWORK_TOPIC`: Event Channel topic (default: insert)
    /// - `FIBWORK_DISPATCH_MODE`: "direct" or "outbox" (default: direct)
    /// - `FIBWORK_EMBEDDED_WORKER`: "true" to compute in-process (default: false)
    /// - `FIBWORK_SHUTDOWN_GRACE_SECS`: Drain deadline (default: 10)
    /// - `FIBWORK_METRICS_ENABLED`: "false" to stop serving /metrics (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let cors_origins = std::env::var("FIBWORK_CORS_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_max_age_secs = std::env::var("FIBWORK_CORS_MAX_AGE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.cors_max_age_secs);

        let max_index = std::env::var("FIBWORK_MAX_INDEX")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_INDEX);

        let dispatch_mode = match std::env::var("FIBWORK_DISPATCH_MODE") {
            Ok(raw) => raw.parse()?,
            Err(_) => DispatchMode::default(),
        };

        let embedded_worker = std::env::var("FIBWORK_EMBEDDED_WORKER")
            .ok()
            .map(|s| matches!(s.trim().to_lowercase().as_str(), "true" | "1"))
            .unwrap_or(false);

        let shutdown_grace = std::env::var("FIBWORK_SHUTDOWN_GRACE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.shutdown_grace);

        let metrics_enabled = std::env::var("FIBWORK_METRICS_ENABLED")
            .ok()
            .map(|s| !matches!(s.trim().to_lowercase().as_str(), "false" | "0"))
            .unwrap_or(defaults.metrics_enabled);

        Ok(Self {
            cors_origins,
            cors_max_age_secs,
            policy: IndexPolicy::new(max_index)?,
            topic: std::env::var("FIBWORK_TOPIC")
                .ok()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(defaults.topic),
            dispatch_mode,
            embedded_worker,
            shutdown_grace,
            metrics_enabled,
        })
    }

    /// Reject storage choices this gateway cannot serve.
    ///
    /// An in-memory channel only reaches subscribers in this process, so it
    /// needs the embedded worker.
    pub fn check_storage(&self, storage: &StorageConfig) -> Result<(), ConfigError> {
        if storage.channel == ChannelBackend::Memory && !self.embedded_worker {
            return Err(ConfigError::IncompatibleOptions {
                option_a: "FIBWORK_CHANNEL_BACKEND=memory".to_string(),
                option_b: "FIBWORK_EMBEDDED_WORKER=false".to_string(),
            });
        }
        Ok(())
    }

    /// Worker settings for the embedded worker.
    ///
    /// Pool and queue sizing come from the worker's own variables; topic and
    /// index policy always match the gateway's.
    pub fn embedded_worker_config(&self) -> Result<WorkerConfig, ConfigError> {
        Ok(WorkerConfig {
            topic: self.topic.clone(),
            policy: self.policy,
            shutdown_grace: self.shutdown_grace,
            ..WorkerConfig::from_env()?
        })
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            // Dev mode: allow all
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // Wildcard subdomains: *.example.com
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain.ends_with(&format!(".{pattern}"));
                }
            }
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert!(config.cors_origins.is_empty());
        assert_eq!(config.cors_max_age_secs, 86400);
        assert_eq!(config.policy.max_index(), 40);
        assert_eq!(config.topic, "insert");
        assert_eq!(config.dispatch_mode, DispatchMode::Direct);
        assert!(!config.embedded_worker);
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
        assert!(config.metrics_enabled);
    }

    #[test]
    fn test_dispatch_mode_parse() {
        assert_eq!("outbox".parse::<DispatchMode>().unwrap(), DispatchMode::Outbox);
        assert_eq!(" Direct ".parse::<DispatchMode>().unwrap(), DispatchMode::Direct);
        assert!("queue".parse::<DispatchMode>().is_err());
    }

    #[test]
    fn test_memory_channel_needs_embedded_worker() {
        let storage = StorageConfig::in_memory();
        let config = ApiConfig::default();
        assert!(matches!(
            config.check_storage(&storage),
            Err(ConfigError::IncompatibleOptions { .. })
        ));

        let config = ApiConfig {
            embedded_worker: true,
            ..ApiConfig::default()
        };
        assert!(config.check_storage(&storage).is_ok());
        assert!(config.check_storage(&StorageConfig::default()).is_ok());
    }

    #[test]
    fn test_origin_allowed_dev_mode() {
        let config = ApiConfig::default();
        assert!(!config.is_production());
        assert!(config.is_origin_allowed("https://anything.com"));
        assert!(config.is_origin_allowed("http://localhost:3000"));
    }

    #[test]
    fn test_origin_allowed_production() {
        let config = ApiConfig {
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "https://fib.example.com".to_string(),
            ],
            ..ApiConfig::default()
        };

        assert!(config.is_production());
        assert!(config.is_origin_allowed("http://localhost:3000"));
        assert!(config.is_origin_allowed("https://fib.example.com"));
        assert!(!config.is_origin_allowed("https://evil.com"));
        assert!(!config.is_origin_allowed("http://localhost:3001"));
    }

    #[test]
    fn test_wildcard_subdomain() {
        let config = ApiConfig {
            cors_origins: vec!["*.example.com".to_string()],
            ..ApiConfig::default()
        };

        assert!(config.is_origin_allowed("https://app.example.com"));
        assert!(!config.is_origin_allowed("https://notexample.com"));
        assert!(!config.is_origin_allowed("http://app.example.com"));
    }
}
