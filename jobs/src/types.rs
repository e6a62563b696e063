//! Job record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

/// Error descriptor frozen into a failed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub message: String,
    pub code: Option<String>,
}

/// One async execution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub agent_id: String,
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub status: JobStatus,
    /// Percentage in [0, 100], monotonically non-decreasing.
    pub progress: u8,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<JobError>,
    pub cost: Option<f64>,
    pub webhook_url: Option<String>,
    /// Provider name once a worker claims the job.
    pub provider: Option<String>,
    pub estimated_duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Specification used to create a job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub agent_id: String,
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub input: serde_json::Value,
    pub webhook_url: Option<String>,
    pub estimated_duration_ms: Option<u64>,
}

/// Selection filter for tenant-scoped job queries.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub agent_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub newest_first: bool,
    pub limit: Option<usize>,
}
