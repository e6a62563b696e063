//! Provenance storage backends

use crate::types::*;
use agent_exchange_database::DatabaseClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Append-only record store.
#[async_trait]
pub trait ProvenanceStore: Send + Sync {
    async fn append(&self, record: ProvenanceRecord) -> Result<()>;
    async fn by_trace(&self, trace_id: Uuid) -> Result<Vec<ProvenanceRecord>>;
    async fn by_run(&self, run_id: Uuid) -> Result<Vec<ProvenanceRecord>>;
    async fn recent(
        &self,
        limit: usize,
        event_type: Option<ProvenanceEventType>,
    ) -> Result<Vec<ProvenanceRecord>>;
    async fn stats(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ProvenanceStats>;
}

/// In-memory store used by tests and as a fallback when no database is
/// configured.
#[derive(Debug, Default)]
pub struct MemoryProvenanceStore {
    records: RwLock<Vec<ProvenanceRecord>>,
}

impl MemoryProvenanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn fold_stats(records: impl Iterator<Item = ProvenanceRecord>) -> ProvenanceStats {
    let mut stats = ProvenanceStats::default();
    for record in records {
        stats.record_count += 1;
        *stats
            .counts_by_type
            .entry(record.event_type.as_str().to_string())
            .or_insert(0) += 1;
        if let Some(llm) = &record.llm {
            stats.total_tokens += llm.input_tokens + llm.output_tokens;
            stats.total_cost += llm.cost.unwrap_or(0.0);
        }
    }
    stats
}

#[async_trait]
impl ProvenanceStore for MemoryProvenanceStore {
    async fn append(&self, record: ProvenanceRecord) -> Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn by_trace(&self, trace_id: Uuid) -> Result<Vec<ProvenanceRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.trace_id == trace_id)
            .cloned()
            .collect())
    }

    async fn by_run(&self, run_id: Uuid) -> Result<Vec<ProvenanceRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn recent(
        &self,
        limit: usize,
        event_type: Option<ProvenanceEventType>,
    ) -> Result<Vec<ProvenanceRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .filter(|r| event_type.map(|t| r.event_type == t).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn stats(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ProvenanceStats> {
        let records = self.records.read().await;
        Ok(fold_stats(
            records
                .iter()
                .filter(|r| r.recorded_at >= from && r.recorded_at <= to)
                .cloned(),
        ))
    }
}

/// SQLite-backed store.
#[derive(Debug, Clone)]
pub struct SqliteProvenanceStore {
    client: DatabaseClient,
}

impl SqliteProvenanceStore {
    pub fn new(client: DatabaseClient) -> Self {
        Self { client }
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ProvenanceRecord> {
        let event_type: String = row.try_get("event_type")?;
        let llm_meta: Option<String> = row.try_get("llm_meta")?;
        let tool_meta: Option<String> = row.try_get("tool_meta")?;
        let error_message: Option<String> = row.try_get("error_message")?;
        let error_code: Option<String> = row.try_get("error_code")?;
        let step_id: Option<String> = row.try_get("step_id")?;
        let recorded_at: String = row.try_get("recorded_at")?;

        Ok(ProvenanceRecord {
            id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            trace_id: Uuid::parse_str(&row.try_get::<String, _>("trace_id")?)?,
            run_id: Uuid::parse_str(&row.try_get::<String, _>("run_id")?)?,
            step_id,
            tenant_id: row.try_get("tenant_id")?,
            event_type: ProvenanceEventType::parse(&event_type)
                .ok_or_else(|| anyhow::anyhow!("unknown event type: {}", event_type))?,
            llm: llm_meta.as_deref().map(serde_json::from_str).transpose()?,
            tool: tool_meta.as_deref().map(serde_json::from_str).transpose()?,
            error: error_message.map(|message| ErrorMeta {
                message,
                code: error_code,
            }),
            recorded_at: DateTime::parse_from_rfc3339(&recorded_at)?.with_timezone(&Utc),
        })
    }
}

#[async_trait]
impl ProvenanceStore for SqliteProvenanceStore {
    async fn append(&self, record: ProvenanceRecord) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO provenance_records
             (id, trace_id, run_id, step_id, tenant_id, event_type,
              llm_meta, tool_meta, error_message, error_code,
              recorded_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(record.id.to_string())
        .bind(record.trace_id.to_string())
        .bind(record.run_id.to_string())
        .bind(&record.step_id)
        .bind(&record.tenant_id)
        .bind(record.event_type.as_str())
        .bind(record.llm.as_ref().map(serde_json::to_string).transpose()?)
        .bind(record.tool.as_ref().map(serde_json::to_string).transpose()?)
        .bind(record.error.as_ref().map(|e| e.message.clone()))
        .bind(record.error.as_ref().and_then(|e| e.code.clone()))
        .bind(record.recorded_at.to_rfc3339())
        .bind(&now)
        .bind(&now)
        .execute(self.client.pool())
        .await
        .context("Failed to append provenance record")?;
        Ok(())
    }

    async fn by_trace(&self, trace_id: Uuid) -> Result<Vec<ProvenanceRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM provenance_records WHERE trace_id = ?1 ORDER BY recorded_at",
        )
        .bind(trace_id.to_string())
        .fetch_all(self.client.pool())
        .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn by_run(&self, run_id: Uuid) -> Result<Vec<ProvenanceRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM provenance_records WHERE run_id = ?1 ORDER BY recorded_at",
        )
        .bind(run_id.to_string())
        .fetch_all(self.client.pool())
        .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn recent(
        &self,
        limit: usize,
        event_type: Option<ProvenanceEventType>,
    ) -> Result<Vec<ProvenanceRecord>> {
        let rows = match event_type {
            Some(t) => {
                sqlx::query(
                    "SELECT * FROM provenance_records WHERE event_type = ?1
                     ORDER BY recorded_at DESC LIMIT ?2",
                )
                .bind(t.as_str())
                .bind(limit as i64)
                .fetch_all(self.client.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM provenance_records ORDER BY recorded_at DESC LIMIT ?1",
                )
                .bind(limit as i64)
                .fetch_all(self.client.pool())
                .await?
            }
        };
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn stats(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ProvenanceStats> {
        let rows = sqlx::query(
            "SELECT * FROM provenance_records WHERE recorded_at >= ?1 AND recorded_at <= ?2",
        )
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
        .fetch_all(self.client.pool())
        .await?;
        let records: Result<Vec<_>> = rows.iter().map(Self::row_to_record).collect();
        Ok(fold_stats(records?.into_iter()))
    }
}
