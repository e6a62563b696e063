//! HTTP request handlers

use crate::error::ApiError;
use crate::state::{tenant_from_headers, AppState};
use agent_exchange_contracts::{AgentCategory, AgentTier, ExchangeError};
use agent_exchange_jobs::{Job, JobFilter, JobStatus};
use agent_exchange_orchestrator::{CatalogQuery, SubmitRequest};
use agent_exchange_orchestrator::service::SyncOutcome;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SubmitJobBody {
    pub agent_id: String,
    pub input: serde_json::Value,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RunAgentBody {
    pub input: serde_json::Value,
    #[serde(default)]
    pub priority: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub newest_first: Option<bool>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ListAgentsQuery {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub available: Option<bool>,
    #[serde(default)]
    pub search: Option<String>,
}

fn job_view(job: &Job) -> serde_json::Value {
    json!({
        "id": job.id,
        "agent_id": job.agent_id,
        "tenant_id": job.tenant_id,
        "status": job.status,
        "progress": job.progress,
        "output": job.output,
        "error": job.error,
        "cost": job.cost,
        "provider": job.provider,
        "created_at": job.created_at,
        "started_at": job.started_at,
        "completed_at": job.completed_at,
    })
}

/// Service health summary.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let queue = state.orchestrator.queue_stats().await;
    Json(json!({
        "status": "healthy",
        "service": "agent-exchange",
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_seconds": (Utc::now() - state.started_at).num_seconds(),
        "queue": {
            "pending": queue.total_pending,
            "active": queue.total_active,
            "processed": queue.total_processed,
        },
    }))
}

/// `POST /jobs`: submit an async job.
pub async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SubmitJobBody>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = tenant_from_headers(&headers);
    let response = state
        .orchestrator
        .submit(SubmitRequest {
            agent_id: body.agent_id,
            input: body.input,
            tenant,
            webhook_url: body.webhook_url,
            priority: body.priority,
            idempotency_key: body.idempotency_key,
        })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!(response))))
}

/// `GET /jobs/{id}`: job status.
pub async fn get_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tenant = tenant_from_headers(&headers);
    let job = state.orchestrator.get_job(&tenant, id).await?;
    Ok(Json(job_view(&job)))
}

/// `GET /jobs`: tenant-scoped listing.
pub async fn list_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tenant = tenant_from_headers(&headers);
    let status = match query.status.as_deref() {
        Some(raw) => Some(JobStatus::parse(raw).ok_or_else(|| {
            ExchangeError::invalid_input("status", format!("unknown status '{}'", raw))
        })?),
        None => None,
    };

    let jobs = state
        .orchestrator
        .list_jobs(
            &tenant,
            &JobFilter {
                status,
                agent_id: query.agent_id,
                newest_first: query.newest_first.unwrap_or(false),
                limit: query.limit,
                ..Default::default()
            },
        )
        .await;
    let views: Vec<serde_json::Value> = jobs.iter().map(job_view).collect();
    let total = views.len();
    Ok(Json(json!({ "jobs": views, "total": total })))
}

/// `POST /jobs/{id}/cancel`: request cancellation.
pub async fn cancel_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tenant = tenant_from_headers(&headers);
    let job = state.orchestrator.cancel_job(&tenant, id).await?;
    Ok(Json(job_view(&job)))
}

/// `POST /agents/{id}/run`: synchronous execution. Falls back to 202
/// with the job id when the sync window elapses first.
pub async fn run_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
    Json(body): Json<RunAgentBody>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant = tenant_from_headers(&headers);
    let outcome = state
        .orchestrator
        .execute_sync(SubmitRequest {
            agent_id,
            input: body.input,
            tenant,
            webhook_url: None,
            priority: body.priority,
            idempotency_key: None,
        })
        .await?;

    match outcome {
        SyncOutcome::Finished(job) => match job.status {
            JobStatus::Completed => Ok((StatusCode::OK, Json(job_view(&job)))),
            _ => {
                let error = job.error.clone();
                Ok((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "id": job.id,
                        "status": job.status,
                        "error": error,
                    })),
                ))
            }
        },
        SyncOutcome::TimedOut { job_id } => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "job_id": job_id,
                "status": "pending",
                "status_url": format!("/jobs/{}", job_id),
            })),
        )),
    }
}

/// `GET /agents/{id}`: capability card.
pub async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cards = state
        .orchestrator
        .catalog_search(&CatalogQuery::default())
        .await;
    let card = cards
        .into_iter()
        .find(|c| c.id == agent_id)
        .ok_or(ExchangeError::AgentNotFound {
            agent_id: agent_id.clone(),
        })?;
    Ok(Json(json!(card)))
}

/// `GET /agents`: catalog with filters and weighted search.
pub async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<ListAgentsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let category = match query.category.as_deref() {
        Some(raw) => Some(
            serde_json::from_value::<AgentCategory>(json!(raw)).map_err(|_| {
                ExchangeError::invalid_input("category", format!("unknown category '{}'", raw))
            })?,
        ),
        None => None,
    };
    let tier = match query.tier.as_deref() {
        Some(raw) => Some(serde_json::from_value::<AgentTier>(json!(raw)).map_err(|_| {
            ExchangeError::invalid_input("tier", format!("unknown tier '{}'", raw))
        })?),
        None => None,
    };

    let cards = state
        .orchestrator
        .catalog_search(&CatalogQuery {
            category,
            tier,
            available_only: query.available.unwrap_or(false),
            search: query.search,
        })
        .await;
    let total = cards.len();
    Ok(Json(json!({ "agents": cards, "total": total })))
}

/// `GET /external-agents`: registry snapshot with health and circuit
/// state.
pub async fn list_external_agents(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshots = state.orchestrator.shared().external.list().await;
    let total = snapshots.len();
    Json(json!({ "agents": snapshots, "total": total }))
}

/// `GET /queue/stats`.
pub async fn queue_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!(state.orchestrator.queue_stats().await))
}

/// `GET /provenance/runs/{run_id}`: the audit trail for one run.
pub async fn run_provenance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(run_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tenant = tenant_from_headers(&headers);
    let records = state
        .orchestrator
        .shared()
        .provenance
        .by_run(run_id)
        .await
        .map_err(|e| ExchangeError::internal(e.to_string()))?;

    let visible: Vec<_> = records
        .into_iter()
        .filter(|r| tenant.can_read(&r.tenant_id))
        .collect();
    let total = visible.len();
    Ok(Json(json!({ "records": visible, "total": total })))
}

/// `GET /policies`: tenant-scoped policy listing.
pub async fn list_policies(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<serde_json::Value> {
    let tenant = tenant_from_headers(&headers);
    let policies = if tenant.is_admin {
        state.policy_cache.all().await
    } else {
        state.policy_cache.applicable(&tenant.tenant_id).await
    };
    let total = policies.len();
    Json(json!({ "policies": policies, "total": total }))
}
