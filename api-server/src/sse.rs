//! SSE streaming endpoint
//!
//! `POST /agents/{id}/stream` opens a server-sent-event stream for a new
//! run. Frames carry `event: <type>`, `data: <json>`, `id: <seq>`;
//! comment keepalives go out every 15 seconds.

use crate::error::ApiError;
use crate::state::{tenant_from_headers, AppState};
use agent_exchange_orchestrator::SubmitRequest;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct StreamAgentBody {
    pub input: serde_json::Value,
    #[serde(default)]
    pub priority: Option<i32>,
}

/// `POST /agents/{id}/stream`: streaming execution over SSE.
pub async fn stream_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
    Json(body): Json<StreamAgentBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let tenant = tenant_from_headers(&headers);
    let (job_id, subscription) = state
        .orchestrator
        .execute_streaming(SubmitRequest {
            agent_id,
            input: body.input,
            tenant,
            webhook_url: None,
            priority: body.priority,
            idempotency_key: None,
        })
        .await?;
    debug!("Opened SSE stream for job {}", job_id);

    let stream = ReceiverStream::new(subscription.receiver).map(|event| {
        let data = serde_json::to_string(&event)
            .unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default()
            .event(event.event_type.as_str())
            .id(event.seq.to_string())
            .data(data))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}
