//! Version record persistence

use crate::types::*;
use agent_exchange_database::DatabaseClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Durable store for version records.
#[async_trait]
pub trait VersionStore: Send + Sync {
    async fn upsert(&self, record: &VersionRecord) -> Result<()>;
    async fn load_all(&self) -> Result<Vec<VersionRecord>>;
}

/// In-memory store for tests.
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    records: RwLock<HashMap<String, VersionRecord>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn upsert(&self, record: &VersionRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<VersionRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}

/// SQLite-backed store.
#[derive(Debug, Clone)]
pub struct SqliteVersionStore {
    client: DatabaseClient,
}

impl SqliteVersionStore {
    pub fn new(client: DatabaseClient) -> Self {
        Self { client }
    }

    fn parse_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
        value
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|d| d.with_timezone(&Utc))
                    .context("invalid timestamp in version record")
            })
            .transpose()
    }
}

#[async_trait]
impl VersionStore for SqliteVersionStore {
    async fn upsert(&self, record: &VersionRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO version_records
             (id, kind, version, status, deprecated_at, reason, replacement_id,
              sunset_date, min_compatible_version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
               version = excluded.version,
               status = excluded.status,
               deprecated_at = excluded.deprecated_at,
               reason = excluded.reason,
               replacement_id = excluded.replacement_id,
               sunset_date = excluded.sunset_date,
               min_compatible_version = excluded.min_compatible_version,
               updated_at = excluded.updated_at",
        )
        .bind(&record.id)
        .bind(record.kind.as_str())
        .bind(&record.version)
        .bind(record.status.as_str())
        .bind(record.deprecated_at.map(|d| d.to_rfc3339()))
        .bind(&record.reason)
        .bind(&record.replacement_id)
        .bind(record.sunset_date.map(|d| d.to_rfc3339()))
        .bind(&record.min_compatible_version)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(self.client.pool())
        .await
        .context("Failed to upsert version record")?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<VersionRecord>> {
        let rows = sqlx::query("SELECT * FROM version_records")
            .fetch_all(self.client.pool())
            .await?;

        rows.iter()
            .map(|row| {
                let kind: String = row.try_get("kind")?;
                let status: String = row.try_get("status")?;
                Ok(VersionRecord {
                    id: row.try_get("id")?,
                    kind: VersionKind::parse(&kind)
                        .ok_or_else(|| anyhow::anyhow!("unknown version kind: {}", kind))?,
                    version: row.try_get("version")?,
                    status: VersionStatus::parse(&status)
                        .ok_or_else(|| anyhow::anyhow!("unknown version status: {}", status))?,
                    deprecated_at: Self::parse_ts(row.try_get("deprecated_at")?)?,
                    reason: row.try_get("reason")?,
                    replacement_id: row.try_get("replacement_id")?,
                    sunset_date: Self::parse_ts(row.try_get("sunset_date")?)?,
                    min_compatible_version: row.try_get("min_compatible_version")?,
                    created_at: Self::parse_ts(row.try_get("created_at")?)?
                        .unwrap_or_else(Utc::now),
                    updated_at: Self::parse_ts(row.try_get("updated_at")?)?
                        .unwrap_or_else(Utc::now),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sqlite_upsert_and_reload() {
        let client = DatabaseClient::new(agent_exchange_database::DatabaseSettings::in_memory())
            .await
            .unwrap();
        let store = SqliteVersionStore::new(client);

        let mut record = VersionRecord::new("agent-x", VersionKind::Agent, "1.2.0");
        store.upsert(&record).await.unwrap();

        record.status = VersionStatus::Deprecated;
        record.deprecated_at = Some(Utc::now());
        record.replacement_id = Some("agent-y".to_string());
        store.upsert(&record).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, VersionStatus::Deprecated);
        assert_eq!(all[0].replacement_id.as_deref(), Some("agent-y"));
    }
}
