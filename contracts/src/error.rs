//! Error taxonomy for the exchange
//!
//! Every failure that can cross a component boundary is one of these
//! variants. Components map internal failures into the taxonomy at their
//! edge; transient upstream failures are retried internally and only
//! surface as `MaxRetriesExceeded`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable machine-readable error codes surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    PermissionDenied,
    AgentNotFound,
    JobNotFound,
    AgentSunset,
    VersionIncompatible,
    QuotaExceeded,
    Timeout,
    MaxRetriesExceeded,
    UpstreamRejected,
    AgentUnavailable,
    Internal,
}

impl ErrorCode {
    /// Wire form, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::AgentNotFound => "AGENT_NOT_FOUND",
            ErrorCode::JobNotFound => "JOB_NOT_FOUND",
            ErrorCode::AgentSunset => "AGENT_SUNSET",
            ErrorCode::VersionIncompatible => "VERSION_INCOMPATIBLE",
            ErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            ErrorCode::UpstreamRejected => "UPSTREAM_REJECTED",
            ErrorCode::AgentUnavailable => "AGENT_UNAVAILABLE",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Top-level error type for exchange operations
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ExchangeError {
    #[error("Invalid input for field '{field}': {message}")]
    InvalidInput { field: String, message: String },

    #[error("Permission denied: {reason}")]
    PermissionDenied {
        reason: String,
        matched_policy: Option<String>,
    },

    #[error("Agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("Agent '{agent_id}' has been sunset")]
    AgentSunset {
        agent_id: String,
        replacement: Option<String>,
    },

    #[error("Version incompatible for agent '{agent_id}': {detail}")]
    VersionIncompatible { agent_id: String, detail: String },

    #[error("Quota exceeded for tenant '{tenant_id}': {limit}")]
    QuotaExceeded { tenant_id: String, limit: String },

    #[error("Operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("Upstream rejected request with status {status}: {body}")]
    UpstreamRejected { status: u16, body: String },

    #[error("Agent '{agent_id}' is unavailable: {reason}")]
    AgentUnavailable { agent_id: String, reason: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ExchangeError {
    /// Whether the caller may retry the same request after a delay.
    ///
    /// Transient upstream conditions and open circuits are retryable;
    /// caller mistakes, policy denials, and lifecycle failures are not.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::Timeout { .. } | ExchangeError::AgentUnavailable { .. }
        )
    }

    /// Stable code for wire serialization.
    pub fn code(&self) -> ErrorCode {
        match self {
            ExchangeError::InvalidInput { .. } => ErrorCode::InvalidInput,
            ExchangeError::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            ExchangeError::AgentNotFound { .. } => ErrorCode::AgentNotFound,
            ExchangeError::JobNotFound { .. } => ErrorCode::JobNotFound,
            ExchangeError::AgentSunset { .. } => ErrorCode::AgentSunset,
            ExchangeError::VersionIncompatible { .. } => ErrorCode::VersionIncompatible,
            ExchangeError::QuotaExceeded { .. } => ErrorCode::QuotaExceeded,
            ExchangeError::Timeout { .. } => ErrorCode::Timeout,
            ExchangeError::MaxRetriesExceeded { .. } => ErrorCode::MaxRetriesExceeded,
            ExchangeError::UpstreamRejected { .. } => ErrorCode::UpstreamRejected,
            ExchangeError::AgentUnavailable { .. } => ErrorCode::AgentUnavailable,
            ExchangeError::Internal { .. } => ErrorCode::Internal,
        }
    }

    /// HTTP status the API surface maps this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            ExchangeError::InvalidInput { .. } => 400,
            ExchangeError::PermissionDenied { .. } => 403,
            ExchangeError::AgentNotFound { .. } | ExchangeError::JobNotFound { .. } => 404,
            ExchangeError::AgentSunset { .. } => 410,
            ExchangeError::VersionIncompatible { .. } => 409,
            ExchangeError::QuotaExceeded { .. } => 429,
            ExchangeError::Timeout { .. } => 504,
            ExchangeError::MaxRetriesExceeded { .. } => 502,
            ExchangeError::UpstreamRejected { status, .. } => *status,
            ExchangeError::AgentUnavailable { .. } => 503,
            ExchangeError::Internal { .. } => 500,
        }
    }

    /// Convenience constructor for validation failures.
    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        ExchangeError::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for opaque internal failures.
    pub fn internal(message: impl Into<String>) -> Self {
        ExchangeError::Internal {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::InvalidInput {
            field: "body".to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let timeout = ExchangeError::Timeout { elapsed_ms: 120_000 };
        let unavailable = ExchangeError::AgentUnavailable {
            agent_id: "a1".to_string(),
            reason: "circuit open".to_string(),
        };
        let denied = ExchangeError::PermissionDenied {
            reason: "policy".to_string(),
            matched_policy: None,
        };
        let exhausted = ExchangeError::MaxRetriesExceeded {
            attempts: 3,
            last_error: "503".to_string(),
        };

        assert!(timeout.retryable());
        assert!(unavailable.retryable());
        assert!(!denied.retryable());
        assert!(!exhausted.retryable());
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(
            ExchangeError::invalid_input("input", "missing").http_status(),
            400
        );
        assert_eq!(
            ExchangeError::QuotaExceeded {
                tenant_id: "t".to_string(),
                limit: "max_pending".to_string()
            }
            .http_status(),
            429
        );
        assert_eq!(
            ExchangeError::UpstreamRejected {
                status: 422,
                body: String::new()
            }
            .http_status(),
            422
        );
    }
}
