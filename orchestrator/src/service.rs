//! Orchestrator service
//!
//! Holds the shared runtime handed to workers and implements the public
//! operations: submit, synchronous execution, streaming execution, and
//! cancellation. The pre-check chain is identical for all three entry
//! points: agent lookup, schema validation, policy, version lifecycle,
//! availability, then quota admission.

use crate::agents::{AgentRegistry, AgentRuntime};
use crate::catalog::{Catalog, CatalogQuery};
use crate::webhook::WebhookDispatcher;
use agent_exchange_contracts::{
    AgentCard, AgentMetadata, ExchangeError, StreamEvent, TenantContext,
};
use agent_exchange_external::{ExternalAgentConfig, ExternalAgentProxy, ExternalAgentRegistry};
use agent_exchange_jobs::{CancelOutcome, Job, JobFilter, JobStore, JobStatus};
use agent_exchange_policy::{AccessRequest, PolicyEngine};
use agent_exchange_provenance::{ProvenanceEventType, ProvenanceLog};
use agent_exchange_queue::{FairQueue, QueueItem, QueueStats};
use agent_exchange_streaming::{StreamHub, Subscription};
use agent_exchange_versioning::{VersionKind, VersionRegistry};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Idempotency keys are remembered for this long.
const IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default queue priority when the caller does not set one.
const DEFAULT_PRIORITY: i32 = 5;

/// Runtime components shared between the service and the worker pool.
pub struct Shared {
    pub agents: Arc<AgentRegistry>,
    pub external: Arc<ExternalAgentRegistry>,
    pub proxy: Arc<ExternalAgentProxy>,
    pub policy: Arc<PolicyEngine>,
    pub versions: Arc<VersionRegistry>,
    pub queue: Arc<FairQueue>,
    pub jobs: Arc<JobStore>,
    pub hub: Arc<StreamHub>,
    pub provenance: ProvenanceLog,
    pub webhooks: Arc<WebhookDispatcher>,
}

/// One execution request as it enters the orchestrator.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub agent_id: String,
    pub input: serde_json::Value,
    pub tenant: TenantContext,
    pub webhook_url: Option<String>,
    pub priority: Option<i32>,
    pub idempotency_key: Option<String>,
}

/// Response to an async submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub status_url: String,
}

/// Result of a synchronous execution.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Finished(Job),
    /// Still running past the sync window; the caller falls back to the
    /// async job API.
    TimedOut { job_id: Uuid },
}

pub struct Orchestrator {
    shared: Arc<Shared>,
    catalog: Catalog,
    idempotency: RwLock<HashMap<String, (Uuid, Instant)>>,
    sync_timeout: Duration,
}

impl Orchestrator {
    pub fn new(shared: Arc<Shared>, catalog: Catalog, sync_timeout: Duration) -> Self {
        Self {
            shared,
            catalog,
            idempotency: RwLock::new(HashMap::new()),
            sync_timeout,
        }
    }

    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Register an in-process agent: metadata, version record, listing.
    pub async fn register_local_agent(
        &self,
        metadata: AgentMetadata,
        agent: Arc<dyn crate::agents::Agent>,
    ) -> Result<(), ExchangeError> {
        let id = metadata.id.clone();
        let version = metadata.version.clone();
        self.shared
            .agents
            .register(metadata.clone(), AgentRuntime::Local(agent))
            .await?;
        if let Err(e) = self
            .shared
            .versions
            .register(&id, VersionKind::Agent, &version, None)
            .await
        {
            warn!("Version registration for {} failed: {}", id, e);
        }
        self.catalog.persist_listing(&metadata).await;
        Ok(())
    }

    /// Register a remote agent: proxy config, metadata, version record,
    /// listing.
    pub async fn register_external_agent(
        &self,
        metadata: AgentMetadata,
        config: ExternalAgentConfig,
    ) -> Result<(), ExchangeError> {
        let id = metadata.id.clone();
        let version = metadata.version.clone();
        self.shared.external.register(config).await?;
        self.shared
            .agents
            .register(metadata.clone(), AgentRuntime::External)
            .await?;
        if let Err(e) = self
            .shared
            .versions
            .register(&id, VersionKind::Agent, &version, None)
            .await
        {
            warn!("Version registration for {} failed: {}", id, e);
        }
        self.catalog.persist_listing(&metadata).await;
        Ok(())
    }

    /// The shared pre-check chain. Returns the agent metadata on success.
    async fn precheck(&self, request: &SubmitRequest) -> Result<AgentMetadata, ExchangeError> {
        let metadata = self
            .shared
            .agents
            .metadata(&request.agent_id)
            .await
            .ok_or_else(|| ExchangeError::AgentNotFound {
                agent_id: request.agent_id.clone(),
            })?;

        self.shared
            .agents
            .validate_input(&request.agent_id, &request.input)
            .await?;

        let decision = self
            .shared
            .policy
            .evaluate(&AccessRequest {
                tenant_id: request.tenant.tenant_id.clone(),
                subject: serde_json::json!({
                    "id": request.tenant.user_id,
                    "tenant": request.tenant.tenant_id,
                    "admin": request.tenant.is_admin,
                }),
                resource: serde_json::json!({
                    "id": request.agent_id,
                    "type": "agent",
                    "category": metadata.category,
                    "tier": metadata.tier,
                }),
                action: "execute".to_string(),
                environment: serde_json::json!({
                    "ip": request.tenant.source_ip,
                }),
            })
            .await;
        if !decision.allowed {
            return Err(ExchangeError::PermissionDenied {
                reason: decision.reason,
                matched_policy: decision.matched_policy_name,
            });
        }

        if let Some(warning) = self
            .shared
            .versions
            .check_before_use(&request.agent_id)
            .await?
        {
            warn!(
                "Agent {} is deprecated ({} day(s) to sunset)",
                request.agent_id,
                warning.days_remaining.unwrap_or(0)
            );
        }

        let available = match self.shared.agents.runtime(&request.agent_id).await {
            Some(AgentRuntime::External) => self.shared.external.available(&request.agent_id).await,
            Some(AgentRuntime::Local(_)) => metadata.enabled,
            None => false,
        };
        if !available {
            return Err(ExchangeError::AgentUnavailable {
                agent_id: request.agent_id.clone(),
                reason: "agent is not accepting work".to_string(),
            });
        }

        Ok(metadata)
    }

    async fn check_idempotency(&self, key: &Option<String>) -> Option<Uuid> {
        let key = key.as_deref()?;
        let mut map = self.idempotency.write().await;
        map.retain(|_, (_, at)| at.elapsed() < IDEMPOTENCY_TTL);
        map.get(key).map(|(id, _)| *id)
    }

    async fn remember_idempotency(&self, key: &Option<String>, job_id: Uuid) {
        if let Some(key) = key {
            self.idempotency
                .write()
                .await
                .insert(key.clone(), (job_id, Instant::now()));
        }
    }

    async fn create_job(
        &self,
        request: &SubmitRequest,
        metadata: &AgentMetadata,
    ) -> Job {
        self.shared
            .jobs
            .create(agent_exchange_jobs::types::JobSpec {
                agent_id: request.agent_id.clone(),
                tenant_id: request.tenant.tenant_id.clone(),
                user_id: request.tenant.user_id.clone(),
                input: request.input.clone(),
                webhook_url: request.webhook_url.clone(),
                estimated_duration_ms: Some(metadata.max_duration_ms),
            })
            .await
    }

    async fn enqueue_job(&self, request: &SubmitRequest, job: &Job) -> Result<(), ExchangeError> {
        let item = QueueItem::new(
            job.id,
            request.tenant.tenant_id.clone(),
            request.agent_id.clone(),
            request.priority.unwrap_or(DEFAULT_PRIORITY),
            serde_json::Value::Null,
        );
        if let Err(error) = self.shared.queue.enqueue(item).await {
            // Admission failed; the job record documents the rejection.
            self.shared.jobs.cancel(job.id).await;
            return Err(error);
        }
        Ok(())
    }

    /// Submit an async job. Returns immediately with the job id.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, ExchangeError> {
        if let Some(existing) = self.check_idempotency(&request.idempotency_key).await {
            if let Some(job) = self.shared.jobs.get(existing).await {
                return Ok(SubmitResponse {
                    job_id: job.id,
                    status: job.status,
                    status_url: format!("/jobs/{}", job.id),
                });
            }
        }

        let metadata = self.precheck(&request).await?;
        let job = self.create_job(&request, &metadata).await;
        self.enqueue_job(&request, &job).await?;
        self.remember_idempotency(&request.idempotency_key, job.id).await;

        info!(
            "Submitted job {} for agent {} (tenant {})",
            job.id, request.agent_id, request.tenant.tenant_id
        );
        Ok(SubmitResponse {
            job_id: job.id,
            status: job.status,
            status_url: format!("/jobs/{}", job.id),
        })
    }

    /// Execute and block until completion or the sync window elapses.
    pub async fn execute_sync(&self, request: SubmitRequest) -> Result<SyncOutcome, ExchangeError> {
        let metadata = self.precheck(&request).await?;
        let job = self.create_job(&request, &metadata).await;

        // Subscribe before enqueueing so no event can be missed.
        let mut subscription = self.shared.hub.subscribe(job.id, Uuid::new_v4()).await;
        if let Err(error) = self.enqueue_job(&request, &job).await {
            self.shared.hub.unsubscribe(job.id, subscription.client_id).await;
            return Err(error);
        }

        let deadline = tokio::time::sleep(self.sync_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                event = subscription.receiver.recv() => {
                    match event {
                        Some(event) if event.event_type.is_terminal() => break,
                        Some(_) => continue,
                        // Stream ended (run closed or reaped).
                        None => break,
                    }
                }
                _ = &mut deadline => {
                    self.shared.hub.unsubscribe(job.id, subscription.client_id).await;
                    return Ok(SyncOutcome::TimedOut { job_id: job.id });
                }
            }
        }

        let finished = self
            .shared
            .jobs
            .get(job.id)
            .await
            .ok_or_else(|| ExchangeError::JobNotFound {
                job_id: job.id.to_string(),
            })?;
        Ok(SyncOutcome::Finished(finished))
    }

    /// Execute with a live event stream. The returned subscription is
    /// attached before the job is admitted, so the caller observes every
    /// event from `start` to the terminal frame.
    pub async fn execute_streaming(
        &self,
        request: SubmitRequest,
    ) -> Result<(Uuid, Subscription), ExchangeError> {
        let metadata = self.precheck(&request).await?;
        let job = self.create_job(&request, &metadata).await;

        let subscription = self.shared.hub.subscribe(job.id, Uuid::new_v4()).await;
        if let Err(error) = self.enqueue_job(&request, &job).await {
            self.shared.hub.unsubscribe(job.id, subscription.client_id).await;
            return Err(error);
        }
        Ok((job.id, subscription))
    }

    /// Fetch a job, enforcing tenant visibility.
    pub async fn get_job(&self, ctx: &TenantContext, job_id: Uuid) -> Result<Job, ExchangeError> {
        let job = self
            .shared
            .jobs
            .get(job_id)
            .await
            .ok_or_else(|| ExchangeError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        if !ctx.can_read(&job.tenant_id) {
            return Err(ExchangeError::PermissionDenied {
                reason: "job belongs to another tenant".to_string(),
                matched_policy: None,
            });
        }
        Ok(job)
    }

    /// List the tenant's jobs.
    pub async fn list_jobs(&self, ctx: &TenantContext, filter: &JobFilter) -> Vec<Job> {
        self.shared.jobs.find_by_tenant(&ctx.tenant_id, filter).await
    }

    /// Request cancellation of a job.
    pub async fn cancel_job(&self, ctx: &TenantContext, job_id: Uuid) -> Result<Job, ExchangeError> {
        // Visibility check first so cross-tenant probes see 403/404, not
        // state details.
        let job = self.get_job(ctx, job_id).await?;

        match self.shared.jobs.cancel(job_id).await {
            CancelOutcome::CancelledFromPending(job) => {
                self.shared.queue.remove(job_id).await;
                self.shared
                    .hub
                    .publish(job_id, StreamEvent::error(job_id, "job cancelled", "CANCELLED"))
                    .await;
                self.shared
                    .provenance
                    .log_run_event(
                        job_id,
                        job_id,
                        &job.tenant_id,
                        ProvenanceEventType::RunCompleted,
                    )
                    .await;
                self.shared.webhooks.deliver(&job).await;
                Ok(job)
            }
            CancelOutcome::SignalledWorker(job) => Ok(job),
            CancelOutcome::AlreadyCancelled(job) => Ok(job),
            CancelOutcome::Terminal(_) => Err(ExchangeError::invalid_input(
                "status",
                format!("job {} already reached a terminal state", job.status.as_str()),
            )),
            CancelOutcome::NotFound => Err(ExchangeError::JobNotFound {
                job_id: job_id.to_string(),
            }),
        }
    }

    pub async fn catalog_search(&self, query: &CatalogQuery) -> Vec<AgentCard> {
        self.catalog.search(query).await
    }

    pub async fn queue_stats(&self) -> QueueStats {
        self.shared.queue.stats().await
    }

    /// Background maintenance: sunset sweeps and idle-run reaping.
    pub fn spawn_maintenance(&self, reap_idle_after: Duration) -> Vec<JoinHandle<()>> {
        let versions = self.shared.versions.clone();
        let sunset_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = versions.process_sunsets().await {
                    warn!("Sunset sweep failed: {}", e);
                }
            }
        });

        let hub = self.shared.hub.clone();
        let reaper_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reaped = hub.reap_idle(reap_idle_after).await;
                if !reaped.is_empty() {
                    info!("Reaped {} idle stream run(s)", reaped.len());
                }
            }
        });

        vec![sunset_task, reaper_task]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentRegistry, EchoAgent, UppercaseAgent};
    use crate::worker::WorkerPool;
    use agent_exchange_policy::{
        LogAuditSink, MemoryPolicyStore, Policy, PolicyCache, PolicyEffect, PolicyStore,
    };
    use agent_exchange_provenance::MemoryProvenanceStore;
    use agent_exchange_queue::TenantQuotas;
    use agent_exchange_versioning::MemoryVersionStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;

    async fn orchestrator_with_policy(policies: Vec<Policy>) -> (Arc<Orchestrator>, WorkerPool) {
        let agents = Arc::new(AgentRegistry::new());
        let external = ExternalAgentRegistry::new(30_000);
        let proxy = Arc::new(ExternalAgentProxy::new(external.clone(), 64));

        let policy_store = Arc::new(MemoryPolicyStore::new());
        for policy in &policies {
            policy_store.upsert(policy).await.unwrap();
        }
        let cache = Arc::new(PolicyCache::new(policy_store, Duration::from_secs(300)));
        let policy = Arc::new(PolicyEngine::new(cache, Arc::new(LogAuditSink)));

        let versions = Arc::new(VersionRegistry::new(Arc::new(MemoryVersionStore::new()), 90));
        let queue = Arc::new(FairQueue::new(TenantQuotas::default()));
        let jobs = Arc::new(JobStore::in_memory());
        let hub = Arc::new(StreamHub::new(256));
        let provenance = ProvenanceLog::new(Arc::new(MemoryProvenanceStore::new()));

        let shared = Arc::new(Shared {
            agents: agents.clone(),
            external,
            proxy,
            policy,
            versions,
            queue,
            jobs,
            hub,
            provenance,
            webhooks: Arc::new(WebhookDispatcher::default()),
        });

        let catalog = Catalog::new(agents, None);
        let orchestrator = Arc::new(Orchestrator::new(
            shared.clone(),
            catalog,
            Duration::from_secs(5),
        ));
        let pool = WorkerPool::spawn(shared, 2);
        (orchestrator, pool)
    }

    fn allow_all() -> Policy {
        Policy::new("allow-all", PolicyEffect::Allow, 100)
    }

    fn request(agent: &str, input: serde_json::Value) -> SubmitRequest {
        SubmitRequest {
            agent_id: agent.to_string(),
            input,
            tenant: TenantContext::new("t1"),
            webhook_url: None,
            priority: None,
            idempotency_key: None,
        }
    }

    async fn wait_for_terminal(orchestrator: &Orchestrator, job_id: Uuid) -> Job {
        for _ in 0..100 {
            let job = orchestrator
                .shared()
                .jobs
                .get(job_id)
                .await
                .expect("job exists");
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {} never reached a terminal state", job_id);
    }

    #[tokio::test]
    async fn submit_runs_local_agent_to_completion() {
        let (orchestrator, _pool) = orchestrator_with_policy(vec![allow_all()]).await;
        orchestrator
            .register_local_agent(AgentMetadata::new("echo", "Echo"), Arc::new(EchoAgent))
            .await
            .unwrap();

        let response = orchestrator
            .submit(request("echo", json!({ "hello": "world" })))
            .await
            .unwrap();
        assert_eq!(response.status, JobStatus::Pending);

        let job = wait_for_terminal(&orchestrator, response.job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.output, Some(json!({ "hello": "world" })));
        assert_eq!(job.progress, 100);
    }

    #[tokio::test]
    async fn unknown_agent_is_rejected_before_any_job_is_created() {
        let (orchestrator, _pool) = orchestrator_with_policy(vec![allow_all()]).await;
        let err = orchestrator
            .submit(request("ghost", json!({})))
            .await
            .unwrap_err();
        matches!(err, ExchangeError::AgentNotFound { .. });
        assert!(orchestrator
            .list_jobs(&TenantContext::new("t1"), &JobFilter::default())
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn default_deny_blocks_execution() {
        let (orchestrator, _pool) = orchestrator_with_policy(Vec::new()).await;
        orchestrator
            .register_local_agent(AgentMetadata::new("echo", "Echo"), Arc::new(EchoAgent))
            .await
            .unwrap();

        let err = orchestrator
            .submit(request("echo", json!({})))
            .await
            .unwrap_err();
        match err {
            ExchangeError::PermissionDenied { .. } => {}
            other => panic!("expected PermissionDenied, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn sunset_agent_cannot_reach_processing() {
        let (orchestrator, _pool) = orchestrator_with_policy(vec![allow_all()]).await;
        orchestrator
            .register_local_agent(AgentMetadata::new("old", "Old"), Arc::new(EchoAgent))
            .await
            .unwrap();

        orchestrator
            .shared()
            .versions
            .deprecate(
                "old",
                "superseded",
                Some("new"),
                Some(Utc::now() - ChronoDuration::days(1)),
            )
            .await
            .unwrap();
        orchestrator.shared().versions.process_sunsets().await.unwrap();

        let err = orchestrator.submit(request("old", json!({}))).await.unwrap_err();
        match err {
            ExchangeError::AgentSunset { replacement, .. } => {
                assert_eq!(replacement.as_deref(), Some("new"));
            }
            other => panic!("expected AgentSunset, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn schema_violation_is_invalid_input() {
        let (orchestrator, _pool) = orchestrator_with_policy(vec![allow_all()]).await;
        let mut metadata = AgentMetadata::new("upper", "Upper");
        metadata.input_schema = json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        });
        orchestrator
            .register_local_agent(metadata, Arc::new(UppercaseAgent))
            .await
            .unwrap();

        let err = orchestrator
            .submit(request("upper", json!({ "bogus": true })))
            .await
            .unwrap_err();
        matches!(err, ExchangeError::InvalidInput { .. });
    }

    #[tokio::test]
    async fn idempotency_key_returns_the_same_job() {
        let (orchestrator, _pool) = orchestrator_with_policy(vec![allow_all()]).await;
        orchestrator
            .register_local_agent(AgentMetadata::new("echo", "Echo"), Arc::new(EchoAgent))
            .await
            .unwrap();

        let mut first_request = request("echo", json!({ "n": 1 }));
        first_request.idempotency_key = Some("key-1".to_string());
        let first = orchestrator.submit(first_request.clone()).await.unwrap();
        let second = orchestrator.submit(first_request).await.unwrap();
        assert_eq!(first.job_id, second.job_id);
    }

    #[tokio::test]
    async fn quota_exhaustion_returns_quota_exceeded() {
        let (orchestrator, _pool) = orchestrator_with_policy(vec![allow_all()]).await;
        orchestrator
            .register_local_agent(AgentMetadata::new("echo", "Echo"), Arc::new(EchoAgent))
            .await
            .unwrap();
        orchestrator
            .shared()
            .queue
            .set_tenant_quotas(
                "t1",
                TenantQuotas {
                    max_pending: 0,
                    ..Default::default()
                },
            )
            .await;

        let err = orchestrator.submit(request("echo", json!({}))).await.unwrap_err();
        match err {
            ExchangeError::QuotaExceeded { limit, .. } => assert_eq!(limit, "max_pending"),
            other => panic!("expected QuotaExceeded, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn execute_sync_returns_the_finished_job() {
        let (orchestrator, _pool) = orchestrator_with_policy(vec![allow_all()]).await;
        orchestrator
            .register_local_agent(AgentMetadata::new("echo", "Echo"), Arc::new(EchoAgent))
            .await
            .unwrap();

        match orchestrator
            .execute_sync(request("echo", json!({ "k": "v" })))
            .await
            .unwrap()
        {
            SyncOutcome::Finished(job) => {
                assert_eq!(job.status, JobStatus::Completed);
                assert_eq!(job.output, Some(json!({ "k": "v" })));
            }
            SyncOutcome::TimedOut { .. } => panic!("echo should finish within the window"),
        }
    }

    #[tokio::test]
    async fn execute_streaming_delivers_ordered_events() {
        let (orchestrator, _pool) = orchestrator_with_policy(vec![allow_all()]).await;
        orchestrator
            .register_local_agent(AgentMetadata::new("echo", "Echo"), Arc::new(EchoAgent))
            .await
            .unwrap();

        let (job_id, mut subscription) = orchestrator
            .execute_streaming(request("echo", json!({ "x": 1 })))
            .await
            .unwrap();

        let mut seqs = Vec::new();
        let mut saw_done = false;
        while let Some(event) = subscription.receiver.recv().await {
            seqs.push(event.seq);
            if event.event_type == agent_exchange_contracts::StreamEventType::Done {
                saw_done = true;
            }
        }
        assert!(saw_done, "stream must end with done");
        let mut sorted = seqs.clone();
        sorted.sort_unstable();
        assert_eq!(seqs, sorted, "sequence numbers must be non-decreasing");
        assert_eq!(seqs.first(), Some(&1));

        let job = orchestrator
            .get_job(&TenantContext::new("t1"), job_id)
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_pending_job_removes_it_from_the_queue() {
        // No workers: jobs stay pending.
        let agents = Arc::new(AgentRegistry::new());
        let external = ExternalAgentRegistry::new(30_000);
        let proxy = Arc::new(ExternalAgentProxy::new(external.clone(), 64));
        let policy_store = Arc::new(MemoryPolicyStore::new());
        policy_store.upsert(&allow_all()).await.unwrap();
        let cache = Arc::new(PolicyCache::new(policy_store, Duration::from_secs(300)));
        let shared = Arc::new(Shared {
            agents: agents.clone(),
            external,
            proxy,
            policy: Arc::new(PolicyEngine::new(cache, Arc::new(LogAuditSink))),
            versions: Arc::new(VersionRegistry::new(Arc::new(MemoryVersionStore::new()), 90)),
            queue: Arc::new(FairQueue::new(TenantQuotas::default())),
            jobs: Arc::new(JobStore::in_memory()),
            hub: Arc::new(StreamHub::new(256)),
            provenance: ProvenanceLog::new(Arc::new(MemoryProvenanceStore::new())),
            webhooks: Arc::new(WebhookDispatcher::default()),
        });
        let orchestrator = Orchestrator::new(
            shared.clone(),
            Catalog::new(agents, None),
            Duration::from_secs(5),
        );
        orchestrator
            .register_local_agent(AgentMetadata::new("echo", "Echo"), Arc::new(EchoAgent))
            .await
            .unwrap();

        let response = orchestrator.submit(request("echo", json!({}))).await.unwrap();
        let ctx = TenantContext::new("t1");
        let cancelled = orchestrator.cancel_job(&ctx, response.job_id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_eq!(shared.queue.stats().await.total_pending, 0);

        // Second cancel returns the record unchanged.
        let again = orchestrator.cancel_job(&ctx, response.job_id).await.unwrap();
        assert_eq!(again.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cross_tenant_reads_require_admin() {
        let (orchestrator, _pool) = orchestrator_with_policy(vec![allow_all()]).await;
        orchestrator
            .register_local_agent(AgentMetadata::new("echo", "Echo"), Arc::new(EchoAgent))
            .await
            .unwrap();

        let response = orchestrator.submit(request("echo", json!({}))).await.unwrap();
        wait_for_terminal(&orchestrator, response.job_id).await;

        let stranger = TenantContext::new("t2");
        let err = orchestrator
            .get_job(&stranger, response.job_id)
            .await
            .unwrap_err();
        matches!(err, ExchangeError::PermissionDenied { .. });

        let mut admin = TenantContext::new("t2");
        admin.is_admin = true;
        assert!(orchestrator.get_job(&admin, response.job_id).await.is_ok());
    }

    #[tokio::test]
    async fn tenant_concurrency_cap_holds_third_job_pending() {
        let (orchestrator, _pool) = orchestrator_with_policy(vec![allow_all()]).await;

        struct SlowAgent;
        #[async_trait::async_trait]
        impl crate::agents::Agent for SlowAgent {
            async fn execute(
                &self,
                input: serde_json::Value,
            ) -> Result<crate::agents::AgentOutput, ExchangeError> {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(crate::agents::AgentOutput {
                    result: input,
                    cost: None,
                })
            }
        }

        orchestrator
            .register_local_agent(AgentMetadata::new("slow", "Slow"), Arc::new(SlowAgent))
            .await
            .unwrap();
        orchestrator
            .shared()
            .queue
            .set_tenant_quotas(
                "t1",
                TenantQuotas {
                    max_concurrent: 2,
                    ..Default::default()
                },
            )
            .await;

        let first = orchestrator.submit(request("slow", json!({}))).await.unwrap();
        let second = orchestrator.submit(request("slow", json!({}))).await.unwrap();
        let third = orchestrator.submit(request("slow", json!({}))).await.unwrap();

        // Give the two workers time to claim jobs 1 and 2.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = orchestrator.queue_stats().await;
        assert_eq!(stats.tenants["t1"].active, 2);
        assert_eq!(stats.tenants["t1"].pending, 1);
        let held = orchestrator
            .get_job(&TenantContext::new("t1"), third.job_id)
            .await
            .unwrap();
        assert_eq!(held.status, JobStatus::Pending);

        for id in [first.job_id, second.job_id, third.job_id] {
            let job = wait_for_terminal(&orchestrator, id).await;
            assert_eq!(job.status, JobStatus::Completed);
        }
    }
}
