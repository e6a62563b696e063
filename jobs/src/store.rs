//! The job store
//!
//! In-memory map is authoritative; every accepted mutation is written
//! through to the repository. Mutations are serialized per store by a
//! short-held write lock; reads are cloned snapshots.

use crate::repository::JobRepository;
use crate::types::*;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of a cancel request.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// Job was pending; it is now cancelled and should be removed from
    /// the queue.
    CancelledFromPending(Job),
    /// Job is processing; the owning worker has been signalled and will
    /// finalize the transition.
    SignalledWorker(Job),
    /// Job was already cancelled; record returned unchanged.
    AlreadyCancelled(Job),
    /// Job completed or failed; cancellation is rejected.
    Terminal(Job),
    NotFound,
}

pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
    cancel_requests: RwLock<HashSet<Uuid>>,
    repository: Option<Arc<dyn JobRepository>>,
}

impl JobStore {
    pub fn new(repository: Option<Arc<dyn JobRepository>>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            cancel_requests: RwLock::new(HashSet::new()),
            repository,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Load persisted jobs into memory at boot.
    pub async fn load(&self) -> anyhow::Result<usize> {
        let Some(repository) = &self.repository else {
            return Ok(0);
        };
        let persisted = repository.load_all().await?;
        let count = persisted.len();
        let mut jobs = self.jobs.write().await;
        for job in persisted {
            jobs.insert(job.id, job);
        }
        info!("Loaded {} persisted job(s)", count);
        Ok(count)
    }

    async fn persist(&self, job: &Job) {
        if let Some(repository) = &self.repository {
            if let Err(e) = repository.save(job).await {
                warn!("Failed to persist job {}: {}", job.id, e);
            }
        }
    }

    /// Create a job in `pending`.
    pub async fn create(&self, spec: JobSpec) -> Job {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            agent_id: spec.agent_id,
            tenant_id: spec.tenant_id,
            user_id: spec.user_id,
            status: JobStatus::Pending,
            progress: 0,
            input: spec.input,
            output: None,
            error: None,
            cost: None,
            webhook_url: spec.webhook_url,
            provider: None,
            estimated_duration_ms: spec.estimated_duration_ms,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        };
        self.jobs.write().await.insert(job.id, job.clone());
        self.persist(&job).await;
        debug!("Created job {} for agent {}", job.id, job.agent_id);
        job
    }

    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// Claim a pending job for a worker. False unless currently pending.
    pub async fn mark_processing(&self, id: Uuid, provider: Option<&str>) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            return false;
        };
        if job.status != JobStatus::Pending {
            return false;
        }
        job.status = JobStatus::Processing;
        job.provider = provider.map(str::to_string);
        job.started_at = Some(Utc::now());
        job.updated_at = Utc::now();
        let snapshot = job.clone();
        drop(jobs);
        self.persist(&snapshot).await;
        true
    }

    /// Raise progress. Clamped to [current, 100]; rejected on terminal
    /// jobs, so progress never decreases.
    pub async fn update_progress(&self, id: Uuid, percent: u8) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            return false;
        };
        if job.status.is_terminal() {
            return false;
        }
        let clamped = percent.min(100).max(job.progress);
        if clamped == job.progress {
            return true;
        }
        job.progress = clamped;
        job.updated_at = Utc::now();
        let snapshot = job.clone();
        drop(jobs);
        self.persist(&snapshot).await;
        true
    }

    /// Raise accumulated cost. Decreases are rejected.
    pub async fn update_cost(&self, id: Uuid, cost: f64) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            return false;
        };
        if job.status.is_terminal() {
            return false;
        }
        if job.cost.map(|current| cost < current).unwrap_or(false) {
            return false;
        }
        job.cost = Some(cost);
        job.updated_at = Utc::now();
        let snapshot = job.clone();
        drop(jobs);
        self.persist(&snapshot).await;
        true
    }

    /// Complete a processing job, freezing its output.
    pub async fn mark_completed(
        &self,
        id: Uuid,
        output: serde_json::Value,
        cost: Option<f64>,
    ) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            return false;
        };
        if job.status != JobStatus::Processing {
            return false;
        }
        job.status = JobStatus::Completed;
        job.output = Some(output);
        if let Some(cost) = cost {
            let floor = job.cost.unwrap_or(0.0);
            job.cost = Some(cost.max(floor));
        }
        job.progress = 100;
        job.completed_at = Some(Utc::now());
        job.updated_at = Utc::now();
        let snapshot = job.clone();
        drop(jobs);
        self.cancel_requests.write().await.remove(&id);
        self.persist(&snapshot).await;
        true
    }

    /// Fail a processing job, freezing its error.
    pub async fn mark_failed(&self, id: Uuid, message: &str, code: Option<&str>) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            return false;
        };
        if job.status != JobStatus::Processing {
            return false;
        }
        job.status = JobStatus::Failed;
        job.error = Some(JobError {
            message: message.to_string(),
            code: code.map(str::to_string),
        });
        job.completed_at = Some(Utc::now());
        job.updated_at = Utc::now();
        let snapshot = job.clone();
        drop(jobs);
        self.cancel_requests.write().await.remove(&id);
        self.persist(&snapshot).await;
        true
    }

    /// Request cancellation. Pending jobs transition immediately; for
    /// processing jobs the owning worker is signalled and finalizes via
    /// [`JobStore::mark_cancelled`].
    pub async fn cancel(&self, id: Uuid) -> CancelOutcome {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            return CancelOutcome::NotFound;
        };
        match job.status {
            JobStatus::Pending => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                job.updated_at = Utc::now();
                let snapshot = job.clone();
                drop(jobs);
                self.persist(&snapshot).await;
                info!("Cancelled pending job {}", id);
                CancelOutcome::CancelledFromPending(snapshot)
            }
            JobStatus::Processing => {
                let snapshot = job.clone();
                drop(jobs);
                self.cancel_requests.write().await.insert(id);
                info!("Signalled cancellation for processing job {}", id);
                CancelOutcome::SignalledWorker(snapshot)
            }
            JobStatus::Cancelled => CancelOutcome::AlreadyCancelled(job.clone()),
            JobStatus::Completed | JobStatus::Failed => CancelOutcome::Terminal(job.clone()),
        }
    }

    /// Whether a cancel has been requested for a processing job. Workers
    /// poll this at every suspension point.
    pub async fn is_cancel_requested(&self, id: Uuid) -> bool {
        self.cancel_requests.read().await.contains(&id)
    }

    /// Finalize a cancellation observed by the owning worker.
    pub async fn mark_cancelled(&self, id: Uuid) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            return false;
        };
        if job.status != JobStatus::Processing && job.status != JobStatus::Pending {
            return false;
        }
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        job.updated_at = Utc::now();
        let snapshot = job.clone();
        drop(jobs);
        self.cancel_requests.write().await.remove(&id);
        self.persist(&snapshot).await;
        true
    }

    /// Tenant-scoped selection, oldest-first unless the filter flips it.
    pub async fn find_by_tenant(&self, tenant_id: &str, filter: &JobFilter) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut selected: Vec<Job> = jobs
            .values()
            .filter(|j| j.tenant_id == tenant_id)
            .filter(|j| filter.status.map(|s| j.status == s).unwrap_or(true))
            .filter(|j| {
                filter
                    .agent_id
                    .as_deref()
                    .map(|a| j.agent_id == a)
                    .unwrap_or(true)
            })
            .filter(|j| filter.since.map(|t| j.created_at >= t).unwrap_or(true))
            .filter(|j| filter.until.map(|t| j.created_at <= t).unwrap_or(true))
            .cloned()
            .collect();

        selected.sort_by_key(|j| j.created_at);
        if filter.newest_first {
            selected.reverse();
        }
        if let Some(limit) = filter.limit {
            selected.truncate(limit);
        }
        selected
    }

    /// Number of non-terminal jobs for a tenant.
    pub async fn open_count(&self, tenant_id: &str) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| j.tenant_id == tenant_id && !j.status.is_terminal())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> JobSpec {
        JobSpec {
            agent_id: "echo".to_string(),
            tenant_id: "t1".to_string(),
            user_id: None,
            input: json!({ "task": "hi" }),
            webhook_url: None,
            estimated_duration_ms: None,
        }
    }

    #[tokio::test]
    async fn lifecycle_happy_path() {
        let store = JobStore::in_memory();
        let job = store.create(spec()).await;
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);

        assert!(store.mark_processing(job.id, Some("local")).await);
        assert!(store.update_progress(job.id, 40).await);
        assert!(store.mark_completed(job.id, json!({ "ok": true }), Some(0.02)).await);

        let done = store.get(job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.provider.as_deref(), Some("local"));
        assert!(done.output.is_some());
        assert!(done.error.is_none());
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let store = JobStore::in_memory();
        let job = store.create(spec()).await;

        // Cannot complete or fail a pending job.
        assert!(!store.mark_completed(job.id, json!(null), None).await);
        assert!(!store.mark_failed(job.id, "x", None).await);

        assert!(store.mark_processing(job.id, None).await);
        // mark_processing is only valid from pending.
        assert!(!store.mark_processing(job.id, None).await);

        assert!(store.mark_completed(job.id, json!(1), None).await);
        // Terminal freeze: nothing mutates a completed job.
        assert!(!store.mark_completed(job.id, json!(2), None).await);
        assert!(!store.mark_failed(job.id, "late", None).await);
        assert!(!store.update_progress(job.id, 10).await);
        assert_eq!(store.get(job.id).await.unwrap().output, Some(json!(1)));
    }

    #[tokio::test]
    async fn progress_is_monotone() {
        let store = JobStore::in_memory();
        let job = store.create(spec()).await;
        store.mark_processing(job.id, None).await;

        assert!(store.update_progress(job.id, 50).await);
        // Lower values clamp to current.
        assert!(store.update_progress(job.id, 20).await);
        assert_eq!(store.get(job.id).await.unwrap().progress, 50);
        // Values above 100 clamp down.
        assert!(store.update_progress(job.id, 200).await);
        assert_eq!(store.get(job.id).await.unwrap().progress, 100);
    }

    #[tokio::test]
    async fn cost_never_decreases() {
        let store = JobStore::in_memory();
        let job = store.create(spec()).await;
        store.mark_processing(job.id, None).await;

        assert!(store.update_cost(job.id, 0.10).await);
        assert!(!store.update_cost(job.id, 0.05).await);
        assert!(store.update_cost(job.id, 0.20).await);
        assert_eq!(store.get(job.id).await.unwrap().cost, Some(0.20));
    }

    #[tokio::test]
    async fn cancel_from_pending_is_immediate() {
        let store = JobStore::in_memory();
        let job = store.create(spec()).await;

        match store.cancel(job.id).await {
            CancelOutcome::CancelledFromPending(j) => assert_eq!(j.status, JobStatus::Cancelled),
            other => panic!("unexpected outcome {:?}", other),
        }
        // Cancel of an already-cancelled job returns the record unchanged.
        match store.cancel(job.id).await {
            CancelOutcome::AlreadyCancelled(j) => assert_eq!(j.status, JobStatus::Cancelled),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancel_while_processing_signals_worker() {
        let store = JobStore::in_memory();
        let job = store.create(spec()).await;
        store.mark_processing(job.id, None).await;

        match store.cancel(job.id).await {
            CancelOutcome::SignalledWorker(j) => assert_eq!(j.status, JobStatus::Processing),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(store.is_cancel_requested(job.id).await);

        assert!(store.mark_cancelled(job.id).await);
        assert!(!store.is_cancel_requested(job.id).await);
        assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_of_terminal_job_is_rejected() {
        let store = JobStore::in_memory();
        let job = store.create(spec()).await;
        store.mark_processing(job.id, None).await;
        store.mark_completed(job.id, json!(null), None).await;

        match store.cancel(job.id).await {
            CancelOutcome::Terminal(j) => assert_eq!(j.status, JobStatus::Completed),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn find_by_tenant_filters_and_orders() {
        let store = JobStore::in_memory();
        let a = store.create(spec()).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let b = store.create(spec()).await;
        let mut other = spec();
        other.tenant_id = "t2".to_string();
        store.create(other).await;

        let oldest_first = store.find_by_tenant("t1", &JobFilter::default()).await;
        assert_eq!(oldest_first.len(), 2);
        assert_eq!(oldest_first[0].id, a.id);

        let newest_first = store
            .find_by_tenant(
                "t1",
                &JobFilter {
                    newest_first: true,
                    limit: Some(1),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(newest_first.len(), 1);
        assert_eq!(newest_first[0].id, b.id);

        store.mark_processing(a.id, None).await;
        let processing = store
            .find_by_tenant(
                "t1",
                &JobFilter {
                    status: Some(JobStatus::Processing),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].id, a.id);
    }
}
