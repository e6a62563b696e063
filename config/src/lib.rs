//! Configuration for the agent exchange
//!
//! Layered loading: embedded defaults, then an optional `exchange.toml`
//! file, then `EXCHANGE__`-prefixed environment variables (double
//! underscore separates nesting, e.g. `EXCHANGE__SERVER__PORT=9090`).
//! Validation runs before the config is handed to any component.

mod loader;
mod validation;

pub use loader::{load, load_from, ConfigError};
pub use validation::validate;

use serde::{Deserialize, Serialize};

/// Root configuration for the exchange process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub external: ExternalConfig,
    pub policy: PolicyConfig,
    pub provenance: ProvenanceConfig,
    pub streaming: StreamingConfig,
    pub versioning: VersioningConfig,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            queue: QueueConfig::default(),
            external: ExternalConfig::default(),
            policy: PolicyConfig::default(),
            provenance: ProvenanceConfig::default(),
            streaming: StreamingConfig::default(),
            versioning: VersioningConfig::default(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Number of worker tasks pulling from the fair queue.
    pub workers: usize,
    /// Ceiling for synchronous execution before the request 202-queues.
    pub sync_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            workers: 4,
            sync_timeout_ms: 120_000,
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path, or `:memory:` for ephemeral runs.
    pub path: String,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "exchange.db".to_string(),
            max_connections: 10,
            connection_timeout_seconds: 30,
        }
    }
}

/// Fair queue defaults applied to tenants without explicit overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub default_max_concurrent: usize,
    pub default_max_pending: usize,
    pub default_max_per_window: usize,
    pub window_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_max_concurrent: 8,
            default_max_pending: 100,
            default_max_per_window: 600,
            window_seconds: 60,
        }
    }
}

/// Outbound proxy defaults; per-agent registration can override each.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalConfig {
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub health_check_interval_seconds: u64,
    pub circuit_reset_ms: u64,
    pub default_max_concurrency: usize,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 120_000,
            connect_timeout_ms: 10_000,
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            health_check_interval_seconds: 30,
            circuit_reset_ms: 30_000,
            default_max_concurrency: 10,
        }
    }
}

/// Policy engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub cache_refresh_seconds: u64,
    pub audit_enabled: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            cache_refresh_seconds: 300,
            audit_enabled: true,
        }
    }
}

/// Provenance log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvenanceConfig {
    /// Persist full payloads instead of hash prefixes when a run sets its
    /// debug flag.
    pub allow_debug_capture: bool,
    pub retention_days: u32,
}

impl Default for ProvenanceConfig {
    fn default() -> Self {
        Self {
            allow_debug_capture: false,
            retention_days: 90,
        }
    }
}

/// Stream hub settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Per-subscriber bounded buffer; overflow disconnects the subscriber.
    pub subscriber_buffer: usize,
    pub keepalive_seconds: u64,
    pub idle_disconnect_seconds: u64,
    /// Chunk size when bridging a synchronous result to token events.
    pub bridge_chunk_chars: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
            keepalive_seconds: 15,
            idle_disconnect_seconds: 60,
            bridge_chunk_chars: 64,
        }
    }
}

/// Version registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VersioningConfig {
    /// Days between deprecation and default sunset.
    pub sunset_period_days: i64,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            sunset_period_days: 90,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ExchangeConfig::default();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn defaults_match_spec_timeouts() {
        let config = ExchangeConfig::default();
        assert_eq!(config.external.request_timeout_ms, 120_000);
        assert_eq!(config.external.connect_timeout_ms, 10_000);
        assert_eq!(config.external.circuit_reset_ms, 30_000);
        assert_eq!(config.streaming.keepalive_seconds, 15);
        assert_eq!(config.policy.cache_refresh_seconds, 300);
    }
}
