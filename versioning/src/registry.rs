//! Version registry service

use crate::compatibility::{check_compatibility, CompatibilityReport};
use crate::storage::VersionStore;
use crate::types::*;
use agent_exchange_contracts::ExchangeError;
use anyhow::Result;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// In-memory registry with write-through persistence.
///
/// The in-memory map is authoritative at runtime; every mutation is
/// written through to the store so state survives restarts.
pub struct VersionRegistry {
    records: RwLock<HashMap<String, VersionRecord>>,
    store: Arc<dyn VersionStore>,
    sunset_period_days: i64,
}

impl VersionRegistry {
    pub fn new(store: Arc<dyn VersionStore>, sunset_period_days: i64) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            store,
            sunset_period_days,
        }
    }

    /// Load persisted records into memory. Called once at boot.
    pub async fn load(&self) -> Result<usize> {
        let persisted = self.store.load_all().await?;
        let count = persisted.len();
        let mut records = self.records.write().await;
        for record in persisted {
            records.insert(record.id.clone(), record);
        }
        info!("Loaded {} version record(s)", count);
        Ok(count)
    }

    /// Register an artifact as active. Re-registering an id replaces the
    /// record (used for version bumps).
    pub async fn register(
        &self,
        id: &str,
        kind: VersionKind,
        version: &str,
        min_compatible_version: Option<&str>,
    ) -> Result<VersionRecord> {
        let mut record = VersionRecord::new(id, kind, version);
        record.min_compatible_version = min_compatible_version.map(str::to_string);

        self.store.upsert(&record).await?;
        self.records
            .write()
            .await
            .insert(id.to_string(), record.clone());
        info!("Registered {} {} at version {}", kind.as_str(), id, version);
        Ok(record)
    }

    /// Mark an artifact deprecated. The sunset date defaults to
    /// now + the configured sunset period.
    pub async fn deprecate(
        &self,
        id: &str,
        reason: &str,
        replacement_id: Option<&str>,
        sunset_date: Option<chrono::DateTime<Utc>>,
    ) -> Result<VersionRecord, ExchangeError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| ExchangeError::AgentNotFound {
                agent_id: id.to_string(),
            })?;

        let now = Utc::now();
        record.status = VersionStatus::Deprecated;
        record.deprecated_at = Some(now);
        record.reason = Some(reason.to_string());
        record.replacement_id = replacement_id.map(str::to_string);
        record.sunset_date =
            Some(sunset_date.unwrap_or(now + Duration::days(self.sunset_period_days)));
        record.updated_at = now;

        let snapshot = record.clone();
        drop(records);

        if let Err(e) = self.store.upsert(&snapshot).await {
            warn!("Failed to persist deprecation of {}: {}", id, e);
        }
        info!(
            "Deprecated {} (sunset {})",
            id,
            snapshot
                .sunset_date
                .map(|d| d.to_rfc3339())
                .unwrap_or_default()
        );
        Ok(snapshot)
    }

    /// Force an artifact to sunset immediately.
    pub async fn sunset(&self, id: &str) -> Result<VersionRecord, ExchangeError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| ExchangeError::AgentNotFound {
                agent_id: id.to_string(),
            })?;

        record.status = VersionStatus::Sunset;
        record.updated_at = Utc::now();
        let snapshot = record.clone();
        drop(records);

        if let Err(e) = self.store.upsert(&snapshot).await {
            warn!("Failed to persist sunset of {}: {}", id, e);
        }
        info!("Sunset {}", id);
        Ok(snapshot)
    }

    /// Sweep every deprecated record whose sunset date has passed.
    /// Returns the ids transitioned in this pass.
    pub async fn process_sunsets(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        let mut transitioned = Vec::new();

        let mut records = self.records.write().await;
        for record in records.values_mut() {
            if record.status == VersionStatus::Deprecated && record.sunset_due(now) {
                record.status = VersionStatus::Sunset;
                record.updated_at = now;
                transitioned.push(record.clone());
            }
        }
        let ids: Vec<String> = transitioned.iter().map(|r| r.id.clone()).collect();
        drop(records);

        for record in &transitioned {
            if let Err(e) = self.store.upsert(record).await {
                warn!("Failed to persist sunset sweep for {}: {}", record.id, e);
            }
        }
        if !ids.is_empty() {
            info!("Sunset sweep transitioned {} artifact(s): {:?}", ids.len(), ids);
        }
        Ok(ids)
    }

    /// Gate an execution on the artifact's lifecycle state.
    ///
    /// Sunset artifacts (including deprecated ones whose sunset date has
    /// passed) fail; deprecated-but-usable artifacts return a warning.
    pub async fn check_before_use(
        &self,
        id: &str,
    ) -> Result<Option<DeprecationWarning>, ExchangeError> {
        let records = self.records.read().await;
        let Some(record) = records.get(id) else {
            // Unversioned artifacts are not gated.
            return Ok(None);
        };

        let now = Utc::now();
        let past_due = record.status == VersionStatus::Deprecated && record.sunset_due(now);
        if record.status == VersionStatus::Sunset || past_due {
            return Err(ExchangeError::AgentSunset {
                agent_id: id.to_string(),
                replacement: record.replacement_id.clone(),
            });
        }

        if record.status == VersionStatus::Deprecated {
            return Ok(Some(DeprecationWarning {
                id: id.to_string(),
                reason: record.reason.clone(),
                replacement_id: record.replacement_id.clone(),
                sunset_date: record.sunset_date,
                days_remaining: record.sunset_date.map(|d| (d - now).num_days()),
            }));
        }

        Ok(None)
    }

    /// Compatibility of a requested version against the registered record.
    pub async fn check_version_compatibility(
        &self,
        id: &str,
        requested: &str,
    ) -> Result<CompatibilityReport, ExchangeError> {
        let records = self.records.read().await;
        let record = records.get(id).ok_or_else(|| ExchangeError::AgentNotFound {
            agent_id: id.to_string(),
        })?;
        Ok(check_compatibility(record, requested))
    }

    pub async fn get(&self, id: &str) -> Option<VersionRecord> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<VersionRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryVersionStore;

    fn registry() -> VersionRegistry {
        VersionRegistry::new(Arc::new(MemoryVersionStore::new()), 90)
    }

    #[tokio::test]
    async fn register_then_check_passes() {
        let registry = registry();
        registry
            .register("agent-x", VersionKind::Agent, "1.0.0", None)
            .await
            .unwrap();
        assert!(registry.check_before_use("agent-x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_artifacts_are_not_gated() {
        let registry = registry();
        assert!(registry.check_before_use("never-seen").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deprecated_returns_warning_with_days_remaining() {
        let registry = registry();
        registry
            .register("agent-x", VersionKind::Agent, "1.0.0", None)
            .await
            .unwrap();
        registry
            .deprecate("agent-x", "superseded", Some("agent-y"), None)
            .await
            .unwrap();

        let warning = registry
            .check_before_use("agent-x")
            .await
            .unwrap()
            .expect("expected a deprecation warning");
        assert_eq!(warning.replacement_id.as_deref(), Some("agent-y"));
        let days = warning.days_remaining.unwrap();
        assert!(days >= 89 && days <= 90, "unexpected days_remaining {}", days);
    }

    #[tokio::test]
    async fn past_due_deprecation_fails_before_sweep() {
        let registry = registry();
        registry
            .register("agent-x", VersionKind::Agent, "1.0.0", None)
            .await
            .unwrap();
        registry
            .deprecate(
                "agent-x",
                "gone",
                Some("agent-y"),
                Some(Utc::now() - Duration::days(1)),
            )
            .await
            .unwrap();

        let err = registry.check_before_use("agent-x").await.unwrap_err();
        match err {
            ExchangeError::AgentSunset { agent_id, replacement } => {
                assert_eq!(agent_id, "agent-x");
                assert_eq!(replacement.as_deref(), Some("agent-y"));
            }
            other => panic!("expected AgentSunset, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn sunset_sweep_transitions_past_due_records() {
        let registry = registry();
        registry
            .register("agent-x", VersionKind::Agent, "1.0.0", None)
            .await
            .unwrap();
        registry
            .deprecate("agent-x", "gone", None, Some(Utc::now() - Duration::days(1)))
            .await
            .unwrap();

        let ids = registry.process_sunsets().await.unwrap();
        assert_eq!(ids, vec!["agent-x".to_string()]);
        assert_eq!(
            registry.get("agent-x").await.unwrap().status,
            VersionStatus::Sunset
        );

        // Sweep is idempotent.
        assert!(registry.process_sunsets().await.unwrap().is_empty());
    }
}
