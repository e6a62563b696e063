//! Agent metadata and catalog types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Marketplace category for catalog filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCategory {
    TextGeneration,
    ImageGeneration,
    CodeGeneration,
    DataAnalysis,
    Translation,
    Summarization,
    Search,
    Utility,
    Other,
}

/// Pricing tier for catalog filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTier {
    Free,
    Standard,
    Premium,
    Enterprise,
}

/// Rough per-invocation price hint shown in listings. Billing itself is
/// settled from provenance records, not from this hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingHint {
    pub currency: String,
    pub amount_per_call: f64,
}

/// Descriptive metadata for a registered agent, local or remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: AgentCategory,
    pub tier: AgentTier,
    pub version: String,
    /// JSON Schema the input payload is validated against before dispatch.
    pub input_schema: serde_json::Value,
    pub tags: Vec<String>,
    /// Per-job wall-clock ceiling enforced by the orchestrator.
    pub max_duration_ms: u64,
    pub pricing: Option<PricingHint>,
    /// False while an agent is registered but not accepting work.
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl AgentMetadata {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category: AgentCategory::Other,
            tier: AgentTier::Free,
            version: "1.0.0".to_string(),
            input_schema: serde_json::json!({ "type": "object" }),
            tags: Vec::new(),
            max_duration_ms: 300_000,
            pricing: None,
            enabled: true,
            created_at: Utc::now(),
        }
    }
}

/// Capability card returned by an agent's `/info` endpoint and by
/// `GET /agents/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCard {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: AgentCategory,
    pub tier: AgentTier,
    pub version: String,
    pub tags: Vec<String>,
    pub available: bool,
    #[serde(default)]
    pub capabilities: HashMap<String, serde_json::Value>,
}

impl From<&AgentMetadata> for AgentCard {
    fn from(meta: &AgentMetadata) -> Self {
        Self {
            id: meta.id.clone(),
            name: meta.name.clone(),
            description: meta.description.clone(),
            category: meta.category,
            tier: meta.tier,
            version: meta.version.clone(),
            tags: meta.tags.clone(),
            available: meta.enabled,
            capabilities: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_defaults() {
        let meta = AgentMetadata::new("echo-v1", "Echo");
        assert!(meta.enabled);
        assert_eq!(meta.version, "1.0.0");
        assert_eq!(meta.max_duration_ms, 300_000);
    }

    #[test]
    fn card_from_metadata_reflects_enabled_flag() {
        let mut meta = AgentMetadata::new("echo-v1", "Echo");
        meta.enabled = false;
        let card = AgentCard::from(&meta);
        assert!(!card.available);
    }
}
