//! Policy persistence

use crate::types::Policy;
use agent_exchange_database::DatabaseClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Durable policy store.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn upsert(&self, policy: &Policy) -> Result<()>;
    async fn delete(&self, id: Uuid) -> Result<bool>;
    async fn load_all(&self) -> Result<Vec<Policy>>;
}

/// In-memory store for tests.
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    policies: RwLock<HashMap<Uuid, Policy>>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn upsert(&self, policy: &Policy) -> Result<()> {
        self.policies
            .write()
            .await
            .insert(policy.id, policy.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.policies.write().await.remove(&id).is_some())
    }

    async fn load_all(&self) -> Result<Vec<Policy>> {
        Ok(self.policies.read().await.values().cloned().collect())
    }
}

/// SQLite-backed store. Indexed columns carry the fields queries filter
/// on; the full policy is serialized into the `document` column.
#[derive(Debug, Clone)]
pub struct SqlitePolicyStore {
    client: DatabaseClient,
}

impl SqlitePolicyStore {
    pub fn new(client: DatabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PolicyStore for SqlitePolicyStore {
    async fn upsert(&self, policy: &Policy) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO policies
             (id, name, tenant_id, priority, effect, enabled, document, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               tenant_id = excluded.tenant_id,
               priority = excluded.priority,
               effect = excluded.effect,
               enabled = excluded.enabled,
               document = excluded.document,
               updated_at = excluded.updated_at",
        )
        .bind(policy.id.to_string())
        .bind(&policy.name)
        .bind(&policy.tenant_id)
        .bind(policy.priority)
        .bind(policy.effect.as_str())
        .bind(policy.enabled)
        .bind(serde_json::to_string(policy)?)
        .bind(&now)
        .bind(&now)
        .execute(self.client.pool())
        .await
        .context("Failed to upsert policy")?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM policies WHERE id = ?1")
            .bind(id.to_string())
            .execute(self.client.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn load_all(&self) -> Result<Vec<Policy>> {
        let rows = sqlx::query("SELECT document FROM policies")
            .fetch_all(self.client.pool())
            .await?;
        rows.iter()
            .map(|row| {
                let document: String = row.try_get("document")?;
                serde_json::from_str(&document).context("Failed to parse policy document")
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PolicyEffect;

    #[tokio::test]
    async fn sqlite_round_trip_and_delete() {
        let client = DatabaseClient::new(agent_exchange_database::DatabaseSettings::in_memory())
            .await
            .unwrap();
        let store = SqlitePolicyStore::new(client);

        let mut policy = Policy::new("allow-all", PolicyEffect::Allow, 100);
        policy.tenant_id = Some("t1".to_string());
        store.upsert(&policy).await.unwrap();

        policy.priority = 50;
        store.upsert(&policy).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].priority, 50);
        assert_eq!(all[0].tenant_id.as_deref(), Some("t1"));

        assert!(store.delete(policy.id).await.unwrap());
        assert!(!store.delete(policy.id).await.unwrap());
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
