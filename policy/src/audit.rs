//! Policy evaluation audit sink
//!
//! Every evaluation is recorded with its decision, the matched policy
//! ids, and the elapsed time. Like provenance, audit writes are
//! best-effort and never fail the evaluation they describe.

use agent_exchange_database::DatabaseClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// One audited evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub tenant_id: String,
    pub subject_id: Option<String>,
    pub resource: String,
    pub action: String,
    pub allowed: bool,
    pub matched_policies: Vec<Uuid>,
    pub elapsed_us: u64,
    pub created_at: DateTime<Utc>,
}

/// Where audit entries go.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<()>;
}

/// Sink that only emits a structured log line. Used when no database is
/// configured and in tests.
#[derive(Debug, Default)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        info!(
            "Policy decision tenant={} action={} resource={} allowed={} matched={:?} elapsed_us={}",
            entry.tenant_id,
            entry.action,
            entry.resource,
            entry.allowed,
            entry.matched_policies,
            entry.elapsed_us
        );
        Ok(())
    }
}

/// SQLite-backed sink.
#[derive(Debug, Clone)]
pub struct SqliteAuditSink {
    client: DatabaseClient,
}

impl SqliteAuditSink {
    pub fn new(client: DatabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO policy_audit
             (id, tenant_id, subject_id, resource, action, decision,
              matched_policies, elapsed_us, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(entry.id.to_string())
        .bind(&entry.tenant_id)
        .bind(&entry.subject_id)
        .bind(&entry.resource)
        .bind(&entry.action)
        .bind(if entry.allowed { "allow" } else { "deny" })
        .bind(serde_json::to_string(&entry.matched_policies)?)
        .bind(entry.elapsed_us as i64)
        .bind(&now)
        .bind(&now)
        .execute(self.client.pool())
        .await
        .context("Failed to record policy audit entry")?;
        Ok(())
    }
}

/// Record an entry, logging instead of propagating failures.
pub async fn record_best_effort(sink: &dyn AuditSink, entry: AuditEntry) {
    if let Err(e) = sink.record(entry).await {
        warn!("Policy audit write failed (dropping entry): {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sqlite_sink_persists_entries() {
        let client = DatabaseClient::new(agent_exchange_database::DatabaseSettings::in_memory())
            .await
            .unwrap();
        let sink = SqliteAuditSink::new(client.clone());

        sink.record(AuditEntry {
            id: Uuid::new_v4(),
            tenant_id: "t1".to_string(),
            subject_id: Some("alice".to_string()),
            resource: "agent:echo".to_string(),
            action: "execute".to_string(),
            allowed: true,
            matched_policies: vec![Uuid::new_v4()],
            elapsed_us: 120,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM policy_audit")
            .fetch_one(client.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
