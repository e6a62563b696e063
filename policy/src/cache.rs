//! Process-wide policy cache
//!
//! Readers evaluate against an in-memory snapshot refreshed from the
//! store every `refresh_interval` or eagerly on mutation. The refresh
//! check is lazy: the first read past the deadline reloads.

use crate::store::PolicyStore;
use crate::types::Policy;
use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub struct PolicyCache {
    store: Arc<dyn PolicyStore>,
    policies: RwLock<Vec<Policy>>,
    refreshed_at: RwLock<Option<Instant>>,
    refresh_interval: Duration,
}

impl PolicyCache {
    pub fn new(store: Arc<dyn PolicyStore>, refresh_interval: Duration) -> Self {
        Self {
            store,
            policies: RwLock::new(Vec::new()),
            refreshed_at: RwLock::new(None),
            refresh_interval,
        }
    }

    /// Reload from the store now.
    pub async fn refresh(&self) -> Result<usize> {
        let loaded = self.store.load_all().await?;
        let count = loaded.len();
        *self.policies.write().await = loaded;
        *self.refreshed_at.write().await = Some(Instant::now());
        debug!("Policy cache refreshed with {} policy(ies)", count);
        Ok(count)
    }

    /// Drop the snapshot's freshness so the next read reloads. Called on
    /// policy mutation.
    pub async fn invalidate(&self) {
        *self.refreshed_at.write().await = None;
    }

    async fn maybe_refresh(&self) {
        let stale = {
            let refreshed_at = self.refreshed_at.read().await;
            match *refreshed_at {
                None => true,
                Some(at) => at.elapsed() >= self.refresh_interval,
            }
        };
        if stale {
            if let Err(e) = self.refresh().await {
                warn!("Policy cache refresh failed, serving stale snapshot: {}", e);
            }
        }
    }

    /// Enabled policies applicable to a tenant: global ones plus the
    /// tenant's own, sorted ascending by priority number.
    pub async fn applicable(&self, tenant_id: &str) -> Vec<Policy> {
        self.maybe_refresh().await;
        let policies = self.policies.read().await;
        let mut applicable: Vec<Policy> = policies
            .iter()
            .filter(|p| p.enabled)
            .filter(|p| {
                p.tenant_id.is_none() || p.tenant_id.as_deref() == Some(tenant_id)
            })
            .cloned()
            .collect();
        applicable.sort_by_key(|p| p.priority);
        applicable
    }

    /// All cached policies (admin listing).
    pub async fn all(&self) -> Vec<Policy> {
        self.maybe_refresh().await;
        self.policies.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryPolicyStore;
    use crate::types::{Policy, PolicyEffect};

    #[tokio::test]
    async fn applicable_filters_tenant_and_sorts_by_priority() {
        let store = Arc::new(MemoryPolicyStore::new());

        let mut global = Policy::new("global-deny", PolicyEffect::Deny, 10);
        global.tenant_id = None;
        let mut tenant_a = Policy::new("a-allow", PolicyEffect::Allow, 5);
        tenant_a.tenant_id = Some("a".to_string());
        let mut tenant_b = Policy::new("b-allow", PolicyEffect::Allow, 1);
        tenant_b.tenant_id = Some("b".to_string());
        let mut disabled = Policy::new("disabled", PolicyEffect::Allow, 0);
        disabled.enabled = false;

        for policy in [&global, &tenant_a, &tenant_b, &disabled] {
            store.upsert(policy).await.unwrap();
        }

        let cache = PolicyCache::new(store, Duration::from_secs(300));
        let applicable = cache.applicable("a").await;
        let names: Vec<&str> = applicable.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a-allow", "global-deny"]);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let store = Arc::new(MemoryPolicyStore::new());
        let cache = PolicyCache::new(store.clone(), Duration::from_secs(300));
        assert!(cache.applicable("a").await.is_empty());

        store
            .upsert(&Policy::new("late", PolicyEffect::Allow, 1))
            .await
            .unwrap();
        // Within the refresh interval the stale snapshot is served.
        assert!(cache.applicable("a").await.is_empty());

        cache.invalidate().await;
        assert_eq!(cache.applicable("a").await.len(), 1);
    }
}
