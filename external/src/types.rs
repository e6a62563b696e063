//! External agent config and runtime state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the remote streams, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingProtocol {
    Sse,
    Websocket,
    Chunked,
    None,
}

/// Outbound authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthConfig {
    None,
    ApiKey {
        key: String,
        /// Header name; defaults to `X-API-Key`.
        #[serde(default = "default_api_key_header")]
        header: String,
    },
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig::None
    }
}

/// Endpoint paths relative to the base URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub execute: String,
    pub stream: String,
    pub health: String,
    pub info: String,
    pub cancel: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            execute: "/execute".to_string(),
            stream: "/execute/stream".to_string(),
            health: "/health".to_string(),
            info: "/info".to_string(),
            cancel: "/execute/cancel".to_string(),
        }
    }
}

/// Retry behavior for outbound calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Upstream statuses worth retrying.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            retryable_statuses: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

/// Immutable-after-registration configuration for one remote agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalAgentConfig {
    pub id: String,
    pub base_url: String,
    #[serde(default)]
    pub endpoints: EndpointConfig,
    pub streaming: StreamingProtocol,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_concurrency: usize,
    /// Zero disables the health ticker.
    pub health_check_interval_seconds: u64,
    pub enabled: bool,
}

impl ExternalAgentConfig {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            endpoints: EndpointConfig::default(),
            streaming: StreamingProtocol::Sse,
            auth: AuthConfig::None,
            retry: RetryPolicy::default(),
            request_timeout_ms: 120_000,
            connect_timeout_ms: 10_000,
            max_concurrency: 10,
            health_check_interval_seconds: 30,
            enabled: true,
        }
    }

    pub fn execute_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.endpoints.execute)
    }

    pub fn stream_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.endpoints.stream)
    }

    pub fn health_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.endpoints.health)
    }

    pub fn info_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.endpoints.info)
    }

    pub fn cancel_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.endpoints.cancel)
    }
}

/// Remote health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// Mutable runtime state for one remote agent. Mutated only by the
/// registry; everyone else reads snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub health: HealthState,
    pub last_check: Option<DateTime<Utc>>,
    pub active_requests: usize,
    pub total_requests: u64,
    pub total_errors: u64,
    /// EWMA with smoothing factor 0.1.
    pub avg_response_ms: f64,
    pub circuit_open: bool,
    pub circuit_reset_at: Option<DateTime<Utc>>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            health: HealthState::Unknown,
            last_check: None,
            active_requests: 0,
            total_requests: 0,
            total_errors: 0,
            avg_response_ms: 0.0,
            circuit_open: false,
            circuit_reset_at: None,
        }
    }
}

impl AgentState {
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_errors as f64 / self.total_requests as f64
        }
    }
}

/// Snapshot of config and state returned by registry queries.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub config: ExternalAgentConfig,
    pub state: AgentState,
    pub available: bool,
}

/// Body POSTed to the remote's execute endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub task: serde_json::Value,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    pub request_id: Uuid,
}

/// Usage metadata echoed by the remote.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageInfo {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cost: Option<f64>,
}

/// JSON body returned by the remote's execute endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub result: serde_json::Value,
    #[serde(default)]
    pub usage: Option<UsageInfo>,
}

/// Capability card served at the remote's info endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfoCard {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
}
