//! Provenance service
//!
//! Thin façade over a [`ProvenanceStore`] that enforces the best-effort
//! write contract: appends are fire-and-forget from the caller's point of
//! view, and a storage failure is logged rather than propagated.

use crate::storage::ProvenanceStore;
use crate::types::*;
use crate::content_hash;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Append-only provenance log.
#[derive(Clone)]
pub struct ProvenanceLog {
    store: Arc<dyn ProvenanceStore>,
}

impl ProvenanceLog {
    pub fn new(store: Arc<dyn ProvenanceStore>) -> Self {
        Self { store }
    }

    /// Append a record. Best-effort: failures are logged and swallowed so
    /// the originating operation is never failed by its own audit trail.
    pub async fn log(&self, record: ProvenanceRecord) {
        debug!(
            "Provenance {} for run {} (trace {})",
            record.event_type.as_str(),
            record.run_id,
            record.trace_id
        );
        if let Err(e) = self.store.append(record).await {
            warn!("Provenance append failed (dropping record): {}", e);
        }
    }

    /// Record an LLM call. `prompt` is hashed; the full text is kept only
    /// when `debug` is set on the originating run.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_llm_call(
        &self,
        trace_id: Uuid,
        run_id: Uuid,
        tenant_id: &str,
        model_id: &str,
        prompt: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost: Option<f64>,
        duration_ms: u64,
        debug: bool,
    ) {
        let mut record =
            ProvenanceRecord::new(trace_id, run_id, tenant_id, ProvenanceEventType::LlmCall);
        record.llm = Some(LlmCallMeta {
            model_id: model_id.to_string(),
            prompt_hash: content_hash(prompt),
            input_tokens,
            output_tokens,
            cost,
            duration_ms,
            effort: None,
            prompt_debug: debug.then(|| prompt.to_string()),
        });
        self.log(record).await;
    }

    /// Record a tool call with hashed arguments and result.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_tool_call(
        &self,
        trace_id: Uuid,
        run_id: Uuid,
        tenant_id: &str,
        name: &str,
        args: &str,
        result: &str,
        side_effect_committed: bool,
        duration_ms: u64,
        debug: bool,
    ) {
        let mut record =
            ProvenanceRecord::new(trace_id, run_id, tenant_id, ProvenanceEventType::ToolCall);
        record.tool = Some(ToolCallMeta {
            name: name.to_string(),
            version: None,
            args_hash: content_hash(args),
            result_hash: content_hash(result),
            side_effect_committed,
            duration_ms,
            args_debug: debug.then(|| args.to_string()),
        });
        self.log(record).await;
    }

    /// Record an error at the point of failure.
    pub async fn log_error(
        &self,
        trace_id: Uuid,
        run_id: Uuid,
        tenant_id: &str,
        message: &str,
        code: Option<&str>,
    ) {
        let mut record =
            ProvenanceRecord::new(trace_id, run_id, tenant_id, ProvenanceEventType::Error);
        record.error = Some(ErrorMeta {
            message: message.to_string(),
            code: code.map(str::to_string),
        });
        self.log(record).await;
    }

    /// Record a run lifecycle transition.
    pub async fn log_run_event(
        &self,
        trace_id: Uuid,
        run_id: Uuid,
        tenant_id: &str,
        event_type: ProvenanceEventType,
    ) {
        self.log(ProvenanceRecord::new(trace_id, run_id, tenant_id, event_type))
            .await;
    }

    pub async fn by_trace(&self, trace_id: Uuid) -> Result<Vec<ProvenanceRecord>> {
        self.store.by_trace(trace_id).await
    }

    pub async fn by_run(&self, run_id: Uuid) -> Result<Vec<ProvenanceRecord>> {
        self.store.by_run(run_id).await
    }

    pub async fn recent(
        &self,
        limit: usize,
        event_type: Option<ProvenanceEventType>,
    ) -> Result<Vec<ProvenanceRecord>> {
        self.store.recent(limit, event_type).await
    }

    pub async fn stats(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ProvenanceStats> {
        self.store.stats(from, to).await
    }
}
