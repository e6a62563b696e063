//! Queue item and stats types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One admission unit. `id` is the job id the item carries through the
/// system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub tenant_id: String,
    pub agent_id: String,
    /// Higher number = earlier service.
    pub priority: i32,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    pub attempt: u32,
}

impl QueueItem {
    pub fn new(
        id: Uuid,
        tenant_id: impl Into<String>,
        agent_id: impl Into<String>,
        priority: i32,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id,
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            priority,
            payload,
            enqueued_at: Utc::now(),
            attempt: 0,
        }
    }
}

/// Per-tenant queue gauges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantQueueStats {
    pub pending: usize,
    pub active: usize,
    pub oldest_pending_age_ms: Option<u64>,
}

/// Whole-queue snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub tenants: HashMap<String, TenantQueueStats>,
    pub total_pending: usize,
    pub total_active: usize,
    pub total_processed: u64,
}
