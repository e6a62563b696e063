//! Job persistence

use crate::types::*;
use agent_exchange_database::DatabaseClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

/// Durable job record storage. The in-memory store writes through on
/// every accepted mutation and loads at boot.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn save(&self, job: &Job) -> Result<()>;
    async fn load_all(&self) -> Result<Vec<Job>>;
}

/// SQLite-backed repository.
#[derive(Debug, Clone)]
pub struct SqliteJobRepository {
    client: DatabaseClient,
}

impl SqliteJobRepository {
    pub fn new(client: DatabaseClient) -> Self {
        Self { client }
    }

    fn parse_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
        value
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|d| d.with_timezone(&Utc))
                    .context("invalid timestamp in job row")
            })
            .transpose()
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
        let status: String = row.try_get("status")?;
        let input: String = row.try_get("input")?;
        let output: Option<String> = row.try_get("output")?;
        let error_message: Option<String> = row.try_get("error_message")?;
        let error_code: Option<String> = row.try_get("error_code")?;
        let progress: i64 = row.try_get("progress")?;
        let estimated: Option<i64> = row.try_get("estimated_duration_ms")?;

        Ok(Job {
            id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
            agent_id: row.try_get("agent_id")?,
            tenant_id: row.try_get("tenant_id")?,
            user_id: row.try_get("user_id")?,
            status: JobStatus::parse(&status)
                .ok_or_else(|| anyhow::anyhow!("unknown job status: {}", status))?,
            progress: progress.clamp(0, 100) as u8,
            input: serde_json::from_str(&input)?,
            output: output.as_deref().map(serde_json::from_str).transpose()?,
            error: error_message.map(|message| JobError {
                message,
                code: error_code,
            }),
            cost: row.try_get("cost")?,
            webhook_url: row.try_get("webhook_url")?,
            provider: row.try_get("provider")?,
            estimated_duration_ms: estimated.map(|v| v.max(0) as u64),
            created_at: Self::parse_ts(Some(row.try_get("created_at")?))?
                .unwrap_or_else(Utc::now),
            started_at: Self::parse_ts(row.try_get("started_at")?)?,
            completed_at: Self::parse_ts(row.try_get("completed_at")?)?,
            updated_at: Self::parse_ts(Some(row.try_get("updated_at")?))?
                .unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn save(&self, job: &Job) -> Result<()> {
        sqlx::query(
            "INSERT INTO jobs
             (id, agent_id, tenant_id, user_id, status, progress, input, output,
              error_message, error_code, cost, webhook_url, provider,
              estimated_duration_ms, started_at, completed_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
             ON CONFLICT(id) DO UPDATE SET
               status = excluded.status,
               progress = excluded.progress,
               output = excluded.output,
               error_message = excluded.error_message,
               error_code = excluded.error_code,
               cost = excluded.cost,
               provider = excluded.provider,
               started_at = excluded.started_at,
               completed_at = excluded.completed_at,
               updated_at = excluded.updated_at",
        )
        .bind(job.id.to_string())
        .bind(&job.agent_id)
        .bind(&job.tenant_id)
        .bind(&job.user_id)
        .bind(job.status.as_str())
        .bind(job.progress as i64)
        .bind(serde_json::to_string(&job.input)?)
        .bind(job.output.as_ref().map(serde_json::to_string).transpose()?)
        .bind(job.error.as_ref().map(|e| e.message.clone()))
        .bind(job.error.as_ref().and_then(|e| e.code.clone()))
        .bind(job.cost)
        .bind(&job.webhook_url)
        .bind(&job.provider)
        .bind(job.estimated_duration_ms.map(|v| v as i64))
        .bind(job.started_at.map(|d| d.to_rfc3339()))
        .bind(job.completed_at.map(|d| d.to_rfc3339()))
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(self.client.pool())
        .await
        .context("Failed to save job")?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs")
            .fetch_all(self.client.pool())
            .await?;
        rows.iter().map(Self::row_to_job).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JobStore;
    use crate::types::JobSpec;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn jobs_survive_a_store_restart() {
        let client = DatabaseClient::new(agent_exchange_database::DatabaseSettings::in_memory())
            .await
            .unwrap();
        let repository = Arc::new(SqliteJobRepository::new(client));

        let store = JobStore::new(Some(repository.clone()));
        let job = store
            .create(JobSpec {
                agent_id: "echo".to_string(),
                tenant_id: "t1".to_string(),
                user_id: Some("alice".to_string()),
                input: json!({ "task": "persist me" }),
                webhook_url: None,
                estimated_duration_ms: Some(1000),
            })
            .await;
        store.mark_processing(job.id, Some("local")).await;
        store.mark_completed(job.id, json!({ "done": true }), Some(0.5)).await;

        // A fresh store over the same repository sees the final state.
        let restarted = JobStore::new(Some(repository));
        assert_eq!(restarted.load().await.unwrap(), 1);
        let loaded = restarted.get(job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(loaded.progress, 100);
        assert_eq!(loaded.cost, Some(0.5));
        assert_eq!(loaded.output, Some(json!({ "done": true })));
        assert_eq!(loaded.user_id.as_deref(), Some("alice"));
    }
}
