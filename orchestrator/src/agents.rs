//! Agent registry and the local agent interface
//!
//! Agents are either in-process implementations of [`Agent`] or remote
//! agents reached through the external proxy. Both kinds carry
//! [`AgentMetadata`] with a JSON Schema that inputs are validated
//! against before any other pre-check runs.

use agent_exchange_contracts::{AgentMetadata, ExchangeError};
use async_trait::async_trait;
use jsonschema::JSONSchema;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Result of one in-process agent execution.
#[derive(Debug, Clone)]
pub struct AgentOutput {
    pub result: serde_json::Value,
    pub cost: Option<f64>,
}

/// An in-process task executor.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Execute against an input that has already passed schema
    /// validation.
    async fn execute(&self, input: serde_json::Value) -> Result<AgentOutput, ExchangeError>;
}

/// How a registered agent executes.
#[derive(Clone)]
pub enum AgentRuntime {
    Local(Arc<dyn Agent>),
    /// Dispatched through the external proxy under the same agent id.
    External,
}

struct AgentEntry {
    metadata: AgentMetadata,
    runtime: AgentRuntime,
    schema: Option<JSONSchema>,
}

/// Registry of every executable agent, local and remote.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentEntry>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Register an agent. The metadata's input schema is compiled once
    /// here; an uncompilable schema rejects the registration.
    pub async fn register(
        &self,
        metadata: AgentMetadata,
        runtime: AgentRuntime,
    ) -> Result<(), ExchangeError> {
        let schema = if metadata.input_schema.is_null() {
            None
        } else {
            Some(JSONSchema::compile(&metadata.input_schema).map_err(|e| {
                ExchangeError::invalid_input("input_schema", e.to_string())
            })?)
        };

        let id = metadata.id.clone();
        self.agents.write().await.insert(
            id.clone(),
            AgentEntry {
                metadata,
                runtime,
                schema,
            },
        );
        info!("Registered agent {}", id);
        Ok(())
    }

    pub async fn deregister(&self, agent_id: &str) -> bool {
        self.agents.write().await.remove(agent_id).is_some()
    }

    pub async fn metadata(&self, agent_id: &str) -> Option<AgentMetadata> {
        self.agents
            .read()
            .await
            .get(agent_id)
            .map(|e| e.metadata.clone())
    }

    pub async fn runtime(&self, agent_id: &str) -> Option<AgentRuntime> {
        self.agents
            .read()
            .await
            .get(agent_id)
            .map(|e| e.runtime.clone())
    }

    pub async fn list(&self) -> Vec<AgentMetadata> {
        self.agents
            .read()
            .await
            .values()
            .map(|e| e.metadata.clone())
            .collect()
    }

    /// Validate an input against the agent's schema. The first violation
    /// is surfaced with its instance path as the field.
    pub async fn validate_input(
        &self,
        agent_id: &str,
        input: &serde_json::Value,
    ) -> Result<(), ExchangeError> {
        let agents = self.agents.read().await;
        let entry = agents.get(agent_id).ok_or_else(|| ExchangeError::AgentNotFound {
            agent_id: agent_id.to_string(),
        })?;

        let Some(schema) = &entry.schema else {
            return Ok(());
        };

        if let Err(mut errors) = schema.validate(input) {
            if let Some(first) = errors.next() {
                let field = first.instance_path.to_string();
                let field = if field.is_empty() { "input".to_string() } else { field };
                debug!(
                    "Input validation failed for {}: {} at {}",
                    agent_id, first, field
                );
                return Err(ExchangeError::InvalidInput {
                    field,
                    message: first.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Interface fixture: echoes its input back.
pub struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    async fn execute(&self, input: serde_json::Value) -> Result<AgentOutput, ExchangeError> {
        Ok(AgentOutput {
            result: input,
            cost: None,
        })
    }
}

/// Interface fixture: uppercases the `text` field of its input.
pub struct UppercaseAgent;

#[async_trait]
impl Agent for UppercaseAgent {
    async fn execute(&self, input: serde_json::Value) -> Result<AgentOutput, ExchangeError> {
        let text = input
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ExchangeError::invalid_input("text", "expected a string"))?;
        Ok(AgentOutput {
            result: serde_json::json!({ "text": text.to_uppercase() }),
            cost: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata_with_schema(id: &str, schema: serde_json::Value) -> AgentMetadata {
        let mut metadata = AgentMetadata::new(id, id);
        metadata.input_schema = schema;
        metadata
    }

    #[tokio::test]
    async fn schema_validation_rejects_bad_input() {
        let registry = AgentRegistry::new();
        registry
            .register(
                metadata_with_schema(
                    "upper",
                    json!({
                        "type": "object",
                        "properties": { "text": { "type": "string" } },
                        "required": ["text"]
                    }),
                ),
                AgentRuntime::Local(Arc::new(UppercaseAgent)),
            )
            .await
            .unwrap();

        assert!(registry
            .validate_input("upper", &json!({ "text": "ok" }))
            .await
            .is_ok());

        let err = registry
            .validate_input("upper", &json!({ "wrong": 1 }))
            .await
            .unwrap_err();
        match err {
            ExchangeError::InvalidInput { .. } => {}
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn invalid_schema_rejects_registration() {
        let registry = AgentRegistry::new();
        let result = registry
            .register(
                metadata_with_schema("broken", json!({ "type": "not-a-type" })),
                AgentRuntime::External,
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unknown_agent_is_not_found() {
        let registry = AgentRegistry::new();
        let err = registry.validate_input("ghost", &json!({})).await.unwrap_err();
        matches!(err, ExchangeError::AgentNotFound { .. });
    }

    #[tokio::test]
    async fn fixture_agents_execute() {
        let echo = EchoAgent;
        let output = echo.execute(json!({ "a": 1 })).await.unwrap();
        assert_eq!(output.result, json!({ "a": 1 }));

        let upper = UppercaseAgent;
        let output = upper.execute(json!({ "text": "hi" })).await.unwrap();
        assert_eq!(output.result, json!({ "text": "HI" }));
    }
}
