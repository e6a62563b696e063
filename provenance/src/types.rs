//! Types for the provenance log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Kinds of events the log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceEventType {
    LlmCall,
    ToolCall,
    Error,
    RunStarted,
    RunCompleted,
    WebhookDelivery,
}

impl ProvenanceEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvenanceEventType::LlmCall => "llm_call",
            ProvenanceEventType::ToolCall => "tool_call",
            ProvenanceEventType::Error => "error",
            ProvenanceEventType::RunStarted => "run_started",
            ProvenanceEventType::RunCompleted => "run_completed",
            ProvenanceEventType::WebhookDelivery => "webhook_delivery",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "llm_call" => Some(ProvenanceEventType::LlmCall),
            "tool_call" => Some(ProvenanceEventType::ToolCall),
            "error" => Some(ProvenanceEventType::Error),
            "run_started" => Some(ProvenanceEventType::RunStarted),
            "run_completed" => Some(ProvenanceEventType::RunCompleted),
            "webhook_delivery" => Some(ProvenanceEventType::WebhookDelivery),
            _ => None,
        }
    }
}

/// Metadata for an LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCallMeta {
    pub model_id: String,
    /// 16-hex SHA-256 prefix of the prompt.
    pub prompt_hash: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Option<f64>,
    pub duration_ms: u64,
    pub effort: Option<String>,
    /// Full prompt text, present only when the run's debug flag is set.
    pub prompt_debug: Option<String>,
}

/// Metadata for a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallMeta {
    pub name: String,
    pub version: Option<String>,
    /// 16-hex SHA-256 prefix of the serialized arguments.
    pub args_hash: String,
    /// 16-hex SHA-256 prefix of the serialized result.
    pub result_hash: String,
    pub side_effect_committed: bool,
    pub duration_ms: u64,
    /// Full argument text, present only when the run's debug flag is set.
    pub args_debug: Option<String>,
}

/// Error captured at the point of failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMeta {
    pub message: String,
    pub code: Option<String>,
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub id: Uuid,
    pub trace_id: Uuid,
    pub run_id: Uuid,
    pub step_id: Option<String>,
    pub tenant_id: String,
    pub event_type: ProvenanceEventType,
    pub llm: Option<LlmCallMeta>,
    pub tool: Option<ToolCallMeta>,
    pub error: Option<ErrorMeta>,
    pub recorded_at: DateTime<Utc>,
}

impl ProvenanceRecord {
    pub fn new(
        trace_id: Uuid,
        run_id: Uuid,
        tenant_id: impl Into<String>,
        event_type: ProvenanceEventType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trace_id,
            run_id,
            step_id: None,
            tenant_id: tenant_id.into(),
            event_type,
            llm: None,
            tool: None,
            error: None,
            recorded_at: Utc::now(),
        }
    }
}

/// Aggregate statistics over a time window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvenanceStats {
    pub counts_by_type: HashMap<String, u64>,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub record_count: u64,
}
