//! The fair scheduler
//!
//! Structure: a map of priority bands, each holding a round-robin
//! rotation of tenants and a FIFO queue per tenant. Dequeue scans bands
//! from the highest priority down and serves the first eligible tenant
//! at or after the band's cursor; the cursor advances past a tenant only
//! when an item is actually taken from it, so capped tenants keep their
//! place in the rotation.

use crate::quotas::{SlidingWindow, TenantQuotas};
use crate::types::{QueueItem, QueueStats, TenantQueueStats};
use agent_exchange_contracts::ExchangeError;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Band {
    rotation: Vec<String>,
    cursor: usize,
    queues: HashMap<String, VecDeque<QueueItem>>,
}

impl Band {
    fn is_empty(&self) -> bool {
        self.rotation.is_empty()
    }
}

#[derive(Default)]
struct QueueState {
    bands: BTreeMap<i32, Band>,
    quotas: HashMap<String, TenantQuotas>,
    default_quotas: TenantQuotas,
    active: HashMap<String, usize>,
    windows: HashMap<String, SlidingWindow>,
    total_processed: u64,
    shutdown: bool,
}

impl QueueState {
    fn quotas_for(&self, tenant_id: &str) -> &TenantQuotas {
        self.quotas.get(tenant_id).unwrap_or(&self.default_quotas)
    }

    fn pending_for(&self, tenant_id: &str) -> usize {
        self.bands
            .values()
            .filter_map(|band| band.queues.get(tenant_id))
            .map(VecDeque::len)
            .sum()
    }
}

/// Tenant-fair priority queue.
pub struct FairQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl FairQueue {
    pub fn new(default_quotas: TenantQuotas) -> Self {
        Self {
            state: Mutex::new(QueueState {
                default_quotas,
                ..Default::default()
            }),
            notify: Notify::new(),
        }
    }

    /// Override quotas for one tenant.
    pub async fn set_tenant_quotas(&self, tenant_id: &str, quotas: TenantQuotas) {
        let mut state = self.state.lock().await;
        state.quotas.insert(tenant_id.to_string(), quotas);
    }

    /// Admit an item. Non-blocking; a denied enqueue is never queued.
    pub async fn enqueue(&self, item: QueueItem) -> Result<(), ExchangeError> {
        let mut state = self.state.lock().await;
        if state.shutdown {
            return Err(ExchangeError::internal("queue is shut down"));
        }

        let quotas = state.quotas_for(&item.tenant_id).clone();
        if state.pending_for(&item.tenant_id) >= quotas.max_pending {
            return Err(ExchangeError::QuotaExceeded {
                tenant_id: item.tenant_id.clone(),
                limit: "max_pending".to_string(),
            });
        }

        let window = state
            .windows
            .entry(item.tenant_id.clone())
            .or_insert_with(SlidingWindow::new);
        if !window.try_admit(
            quotas.max_per_window,
            Duration::from_secs(quotas.window_seconds),
        ) {
            return Err(ExchangeError::QuotaExceeded {
                tenant_id: item.tenant_id.clone(),
                limit: "max_requests_per_window".to_string(),
            });
        }

        debug!(
            "Enqueued item {} for tenant {} at priority {}",
            item.id, item.tenant_id, item.priority
        );
        Self::push_item(&mut state, item);
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    /// Re-admit an item after a worker gave it back (shutdown mid-flight).
    /// Bypasses admission quotas and bumps the attempt counter.
    pub async fn requeue(&self, mut item: QueueItem) {
        item.attempt += 1;
        let mut state = self.state.lock().await;
        Self::push_item(&mut state, item);
        drop(state);
        self.notify.notify_one();
    }

    fn push_item(state: &mut QueueState, item: QueueItem) {
        let band = state.bands.entry(item.priority).or_default();
        if !band.rotation.iter().any(|t| t == &item.tenant_id) {
            band.rotation.push(item.tenant_id.clone());
        }
        band.queues
            .entry(item.tenant_id.clone())
            .or_default()
            .push_back(item);
    }

    /// Block until an eligible item exists or the queue shuts down.
    /// Returns `None` on shutdown. The dequeued tenant's active count is
    /// incremented; the caller must pair this with [`FairQueue::complete`].
    pub async fn dequeue(&self) -> Option<QueueItem> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.shutdown {
                    return None;
                }
                if let Some(item) = Self::pop_eligible(&mut state) {
                    // More eligible work may remain for other idle workers.
                    drop(state);
                    self.notify.notify_one();
                    return Some(item);
                }
            }

            notified.await;
        }
    }

    /// Non-blocking dequeue attempt.
    pub async fn try_dequeue(&self) -> Option<QueueItem> {
        let mut state = self.state.lock().await;
        if state.shutdown {
            return None;
        }
        Self::pop_eligible(&mut state)
    }

    fn pop_eligible(state: &mut QueueState) -> Option<QueueItem> {
        // Highest priority band first.
        let priorities: Vec<i32> = state.bands.keys().rev().copied().collect();
        for priority in priorities {
            let Some(band) = state.bands.get(&priority) else {
                continue;
            };
            let len = band.rotation.len();
            let cursor = band.cursor;

            let mut selected: Option<(usize, String)> = None;
            for step in 0..len {
                let index = (cursor + step) % len;
                let tenant = &band.rotation[index];
                let has_items = band
                    .queues
                    .get(tenant)
                    .map(|q| !q.is_empty())
                    .unwrap_or(false);
                if !has_items {
                    continue;
                }
                let active = state.active.get(tenant).copied().unwrap_or(0);
                if active >= state.quotas_for(tenant).max_concurrent {
                    // At cap: skip without advancing the cursor past it.
                    continue;
                }
                selected = Some((index, tenant.clone()));
                break;
            }

            let Some((index, tenant)) = selected else {
                continue;
            };

            let band = state.bands.get_mut(&priority)?;
            let queue = band.queues.get_mut(&tenant)?;
            let item = queue.pop_front()?;

            if queue.is_empty() {
                band.queues.remove(&tenant);
                band.rotation.retain(|t| t != &tenant);
                if band.rotation.is_empty() {
                    band.cursor = 0;
                } else {
                    // Removing the served tenant leaves the cursor on its
                    // successor.
                    band.cursor = index % band.rotation.len();
                }
            } else {
                band.cursor = (index + 1) % band.rotation.len();
            }
            if band.is_empty() {
                state.bands.remove(&priority);
            }

            *state.active.entry(item.tenant_id.clone()).or_insert(0) += 1;
            return Some(item);
        }
        None
    }

    /// Release a tenant's concurrency slot after its run finishes.
    pub async fn complete(&self, tenant_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(active) = state.active.get_mut(tenant_id) {
            *active = active.saturating_sub(1);
        }
        state.total_processed += 1;
        drop(state);
        // Freed capacity may make a skipped tenant eligible.
        self.notify.notify_one();
    }

    /// Remove a pending item (cancellation before dispatch).
    pub async fn remove(&self, item_id: Uuid) -> Option<QueueItem> {
        let mut state = self.state.lock().await;
        let mut removed = None;
        let mut empty_bands = Vec::new();

        for (priority, band) in state.bands.iter_mut() {
            let mut emptied_tenant = None;
            for (tenant, queue) in band.queues.iter_mut() {
                if let Some(pos) = queue.iter().position(|i| i.id == item_id) {
                    removed = queue.remove(pos);
                    if queue.is_empty() {
                        emptied_tenant = Some(tenant.clone());
                    }
                    break;
                }
            }
            if let Some(tenant) = emptied_tenant {
                band.queues.remove(&tenant);
                if let Some(index) = band.rotation.iter().position(|t| t == &tenant) {
                    band.rotation.remove(index);
                    if band.rotation.is_empty() {
                        band.cursor = 0;
                    } else if index < band.cursor {
                        band.cursor -= 1;
                    } else {
                        band.cursor %= band.rotation.len();
                    }
                }
            }
            if band.is_empty() {
                empty_bands.push(*priority);
            }
            if removed.is_some() {
                break;
            }
        }
        for priority in empty_bands {
            state.bands.remove(&priority);
        }
        removed
    }

    /// Wake all blocked dequeues and refuse further work.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.shutdown = true;
        drop(state);
        self.notify.notify_waiters();
        info!("Queue closed");
    }

    /// Per-tenant gauges and totals.
    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        let now = Utc::now();
        let mut tenants: HashMap<String, TenantQueueStats> = HashMap::new();

        for band in state.bands.values() {
            for (tenant, queue) in &band.queues {
                let entry = tenants.entry(tenant.clone()).or_default();
                entry.pending += queue.len();
                if let Some(oldest) = queue.front() {
                    let age = (now - oldest.enqueued_at).num_milliseconds().max(0) as u64;
                    entry.oldest_pending_age_ms = Some(
                        entry
                            .oldest_pending_age_ms
                            .map(|current| current.max(age))
                            .unwrap_or(age),
                    );
                }
            }
        }
        for (tenant, active) in &state.active {
            if *active > 0 {
                tenants.entry(tenant.clone()).or_default().active = *active;
            }
        }

        QueueStats {
            total_pending: tenants.values().map(|t| t.pending).sum(),
            total_active: tenants.values().map(|t| t.active).sum(),
            total_processed: state.total_processed,
            tenants,
        }
    }
}
