//! Worker pool
//!
//! N workers pull from the fair queue and own one job at a time. A
//! worker checks for cancellation before dispatch, while the upstream
//! call is in flight, and after it returns; outbound payloads are
//! tokenized and results detokenized inside the run's scope. Terminal
//! transitions publish to the stream hub, append provenance, and fire
//! webhooks.

use crate::service::Shared;
use agent_exchange_contracts::{ExchangeError, StreamEvent, StreamEventType};
use agent_exchange_external::ExecuteRequest;
use agent_exchange_jobs::Job;
use agent_exchange_pii::ScopedTokenizer;
use agent_exchange_provenance::ProvenanceEventType;
use agent_exchange_queue::QueueItem;
use crate::agents::AgentRuntime;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How often a worker polls the cancel flag while an upstream call is in
/// flight.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(200);

enum ExecOutcome {
    Done(Result<(serde_json::Value, Option<f64>), ExchangeError>),
    Cancelled,
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers over the shared runtime.
    pub fn spawn(shared: Arc<Shared>, count: usize) -> Self {
        let handles = (0..count.max(1))
            .map(|index| {
                let shared = shared.clone();
                tokio::spawn(async move {
                    info!("Worker {} started", index);
                    while let Some(item) = shared.queue.dequeue().await {
                        let tenant = item.tenant_id.clone();
                        process_item(&shared, item).await;
                        shared.queue.complete(&tenant).await;
                    }
                    info!("Worker {} stopped", index);
                })
            })
            .collect();
        Self { handles }
    }

    /// Wait for every worker to observe queue shutdown and exit.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn process_item(shared: &Arc<Shared>, item: QueueItem) {
    let run_id = item.id;
    let Some(job) = shared.jobs.get(run_id).await else {
        debug!("Dequeued item {} has no job record; dropping", run_id);
        return;
    };

    // Cancelled while queued (store already transitioned it).
    if job.status.is_terminal() {
        return;
    }

    let runtime = shared.agents.runtime(&job.agent_id).await;
    let provider = match &runtime {
        Some(AgentRuntime::Local(_)) => "local",
        Some(AgentRuntime::External) => "external",
        None => "unknown",
    };
    if !shared.jobs.mark_processing(run_id, Some(provider)).await {
        return;
    }

    shared
        .provenance
        .log_run_event(run_id, run_id, &job.tenant_id, ProvenanceEventType::RunStarted)
        .await;
    shared.hub.publish(run_id, StreamEvent::start(run_id)).await;

    let scope = ScopedTokenizer::new();
    let outcome = match runtime {
        None => ExecOutcome::Done(Err(ExchangeError::AgentNotFound {
            agent_id: job.agent_id.clone(),
        })),
        Some(AgentRuntime::Local(agent)) => execute_local(shared, &job, agent).await,
        Some(AgentRuntime::External) => execute_external(shared, &job, &scope).await,
    };

    // A cancel that raced the final await still wins.
    let outcome = if shared.jobs.is_cancel_requested(run_id).await {
        ExecOutcome::Cancelled
    } else {
        outcome
    };

    match outcome {
        ExecOutcome::Cancelled => finish_cancelled(shared, &job).await,
        ExecOutcome::Done(Ok((output, cost))) => finish_completed(shared, &job, output, cost).await,
        ExecOutcome::Done(Err(error)) => finish_failed(shared, &job, error).await,
    }
}

async fn execute_local(
    shared: &Arc<Shared>,
    job: &Job,
    agent: Arc<dyn crate::agents::Agent>,
) -> ExecOutcome {
    let max_duration = shared
        .agents
        .metadata(&job.agent_id)
        .await
        .map(|m| m.max_duration_ms)
        .unwrap_or(300_000);
    let input = job.input.clone();
    let run_id = job.id;

    let mut handle = tokio::spawn(async move {
        match tokio::time::timeout(Duration::from_millis(max_duration), agent.execute(input)).await
        {
            Ok(Ok(output)) => Ok((output.result, output.cost)),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(ExchangeError::Timeout {
                elapsed_ms: max_duration,
            }),
        }
    });

    tokio::select! {
        joined = &mut handle => ExecOutcome::Done(
            joined.unwrap_or_else(|e| Err(ExchangeError::internal(e.to_string()))),
        ),
        _ = wait_for_cancel(shared, run_id) => {
            // Let the agent task finish on its own; the job is already
            // decided.
            ExecOutcome::Cancelled
        }
    }
}

async fn execute_external(shared: &Arc<Shared>, job: &Job, scope: &ScopedTokenizer) -> ExecOutcome {
    let run_id = job.id;
    let tokenized_task = scope.tokenize_json(&job.input);
    let request = ExecuteRequest {
        task: tokenized_task.clone(),
        stream: true,
        model: None,
        budget: None,
        context: None,
        request_id: run_id,
    };

    // The proxy decides between SSE passthrough and the synchronous
    // bridge from the agent's config; both arrive here as a stream.
    let started = Instant::now();
    let result = execute_external_streaming(shared, job, request, scope).await;

    match result {
        ExecOutcome::Done(Ok((raw_output, cost))) => {
            let output = scope.detokenize_json(&raw_output);
            shared
                .provenance
                .log_tool_call(
                    run_id,
                    run_id,
                    &job.tenant_id,
                    &job.agent_id,
                    &tokenized_task.to_string(),
                    &output.to_string(),
                    true,
                    started.elapsed().as_millis() as u64,
                    false,
                )
                .await;
            ExecOutcome::Done(Ok((output, cost)))
        }
        other => other,
    }
}

async fn execute_external_streaming(
    shared: &Arc<Shared>,
    job: &Job,
    request: ExecuteRequest,
    scope: &ScopedTokenizer,
) -> ExecOutcome {
    let run_id = job.id;
    let agent_id = job.agent_id.clone();
    let proxy = shared.proxy.clone();
    let (sender, mut receiver) = mpsc::channel::<StreamEvent>(64);

    let request_for_call = request.clone();
    let handle = tokio::spawn(async move {
        proxy
            .execute_streaming(&agent_id, &request_for_call, sender)
            .await
    });

    // Forward upstream events into the hub while watching for
    // cancellation. Terminal events are captured, not forwarded: the
    // worker publishes the unified terminal event after the job record
    // settles.
    let mut final_result: Option<serde_json::Value> = None;
    let mut final_cost: Option<f64> = None;
    let mut accumulated = String::new();
    let mut upstream_error: Option<ExchangeError> = None;
    let mut cancelled = false;

    loop {
        tokio::select! {
            event = receiver.recv() => {
                let Some(event) = event else { break };
                match event.event_type {
                    StreamEventType::Done => {
                        final_result = event.data.get("result").cloned();
                        final_cost = event
                            .data
                            .get("usage")
                            .and_then(|u| u.get("cost"))
                            .and_then(|v| v.as_f64());
                        break;
                    }
                    StreamEventType::Error => {
                        let message = event.data.get("message")
                            .and_then(|v| v.as_str())
                            .unwrap_or("upstream stream error")
                            .to_string();
                        upstream_error = Some(ExchangeError::internal(message));
                        break;
                    }
                    StreamEventType::Token => {
                        let mut event = event;
                        // Restore tokenized values before anything leaves
                        // the run's boundary.
                        event.data = scope.detokenize_json(&event.data);
                        if let Some(text) = event.data.get("text").and_then(|v| v.as_str()) {
                            accumulated.push_str(text);
                        }
                        shared.hub.publish(run_id, event).await;
                    }
                    StreamEventType::Progress => {
                        if let Some(percent) = event.data.get("percent").and_then(|v| v.as_u64()) {
                            shared.jobs.update_progress(run_id, percent.min(100) as u8).await;
                        }
                        shared.hub.publish(run_id, event).await;
                    }
                    _ => {
                        let mut event = event;
                        event.data = scope.detokenize_json(&event.data);
                        shared.hub.publish(run_id, event).await;
                    }
                }
            }
            _ = wait_for_cancel(shared, run_id) => {
                cancelled = true;
                break;
            }
        }
    }

    if cancelled {
        // Dropping the receiver makes the proxy's next forward fail,
        // ending the upstream read.
        drop(receiver);
        shared.proxy.cancel(&job.agent_id, run_id).await;
        return ExecOutcome::Cancelled;
    }

    // Surface the proxy's own verdict when the channel closed without a
    // terminal frame.
    let call_result = handle.await;
    if let Some(error) = upstream_error {
        return ExecOutcome::Done(Err(error));
    }
    if let Ok(Err(error)) = call_result {
        return ExecOutcome::Done(Err(error));
    }

    let output = final_result.unwrap_or_else(|| serde_json::Value::String(accumulated));
    ExecOutcome::Done(Ok((output, final_cost)))
}

/// Resolve once cancellation is requested for the run.
async fn wait_for_cancel(shared: &Arc<Shared>, run_id: Uuid) {
    loop {
        if shared.jobs.is_cancel_requested(run_id).await {
            return;
        }
        tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
    }
}

async fn finish_completed(
    shared: &Arc<Shared>,
    job: &Job,
    output: serde_json::Value,
    cost: Option<f64>,
) {
    let run_id = job.id;
    if !shared.jobs.mark_completed(run_id, output.clone(), cost).await {
        return;
    }
    shared
        .hub
        .publish(run_id, StreamEvent::progress(run_id, 100))
        .await;
    shared
        .hub
        .publish(run_id, StreamEvent::done(run_id, Some(output)))
        .await;
    shared
        .provenance
        .log_run_event(run_id, run_id, &job.tenant_id, ProvenanceEventType::RunCompleted)
        .await;
    deliver_webhook(shared, run_id).await;
}

async fn finish_failed(shared: &Arc<Shared>, job: &Job, error: ExchangeError) {
    let run_id = job.id;
    let code = error.code().as_str().to_string();
    if !shared
        .jobs
        .mark_failed(run_id, &error.to_string(), Some(&code))
        .await
    {
        return;
    }
    warn!("Job {} failed: {}", run_id, error);
    shared
        .hub
        .publish(run_id, StreamEvent::error(run_id, error.to_string(), code.clone()))
        .await;
    shared
        .provenance
        .log_error(run_id, run_id, &job.tenant_id, &error.to_string(), Some(&code))
        .await;
    deliver_webhook(shared, run_id).await;
}

async fn finish_cancelled(shared: &Arc<Shared>, job: &Job) {
    let run_id = job.id;
    if !shared.jobs.mark_cancelled(run_id).await {
        return;
    }
    info!("Job {} cancelled", run_id);
    shared
        .hub
        .publish(
            run_id,
            StreamEvent::error(run_id, "job cancelled", "CANCELLED"),
        )
        .await;
    shared
        .provenance
        .log_run_event(run_id, run_id, &job.tenant_id, ProvenanceEventType::RunCompleted)
        .await;
    deliver_webhook(shared, run_id).await;
}

/// Deliver the terminal webhook and record the outcome in provenance.
async fn deliver_webhook(shared: &Arc<Shared>, run_id: Uuid) {
    let Some(job) = shared.jobs.get(run_id).await else {
        return;
    };
    if job.webhook_url.is_none() {
        return;
    }
    let delivered = shared.webhooks.deliver(&job).await;
    if delivered {
        shared
            .provenance
            .log_run_event(
                run_id,
                run_id,
                &job.tenant_id,
                ProvenanceEventType::WebhookDelivery,
            )
            .await;
    } else {
        shared
            .provenance
            .log_error(
                run_id,
                run_id,
                &job.tenant_id,
                "webhook delivery failed",
                Some("WEBHOOK_DELIVERY"),
            )
            .await;
    }
}
