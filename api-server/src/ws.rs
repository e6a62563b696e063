//! WebSocket endpoint
//!
//! JSON frames both ways. Clients send
//! `{type: execute|cancel|subscribe|unsubscribe|ping, id?, payload?}`;
//! the server answers with `{type: ack|event|error|pong, id?, payload?,
//! timestamp}`. The server pings every 30 seconds and terminates
//! clients silent for more than 60.

use crate::state::{tenant_from_headers, AppState};
use agent_exchange_contracts::{StreamEvent, TenantContext};
use agent_exchange_orchestrator::SubmitRequest;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

const SERVER_PING_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_SILENCE_LIMIT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct ClientFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ServerFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
    timestamp: chrono::DateTime<Utc>,
}

impl ServerFrame {
    fn new(frame_type: &str, id: Option<String>, payload: Option<serde_json::Value>) -> Self {
        Self {
            frame_type: frame_type.to_string(),
            id,
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// `GET /ws`: upgrade to the WebSocket protocol.
pub async fn websocket_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let tenant = tenant_from_headers(&headers);
    ws.on_upgrade(move |socket| handle_socket(state, tenant, socket))
}

async fn handle_socket(state: AppState, tenant: TenantContext, socket: WebSocket) {
    let client_id = Uuid::new_v4();
    debug!("WebSocket client {} connected (tenant {})", client_id, tenant.tenant_id);

    let (mut sink, mut stream) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<ServerFrame>(256);
    let mut forwarders: HashMap<Uuid, JoinHandle<()>> = HashMap::new();
    let mut last_activity = Instant::now();
    let mut ping = tokio::time::interval(SERVER_PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        handle_frame(&state, &tenant, client_id, &text, &outbound, &mut forwarders)
                            .await;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        last_activity = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket client {} read error: {}", client_id, e);
                        break;
                    }
                }
            }
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { break };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to serialize server frame: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if last_activity.elapsed() > CLIENT_SILENCE_LIMIT {
                    debug!("WebSocket client {} silent too long; terminating", client_id);
                    break;
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    for (run_id, handle) in forwarders {
        handle.abort();
        state
            .orchestrator
            .shared()
            .hub
            .unsubscribe(run_id, client_id)
            .await;
    }
    debug!("WebSocket client {} disconnected", client_id);
}

async fn handle_frame(
    state: &AppState,
    tenant: &TenantContext,
    client_id: Uuid,
    text: &str,
    outbound: &mpsc::Sender<ServerFrame>,
    forwarders: &mut HashMap<Uuid, JoinHandle<()>>,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            let _ = outbound
                .send(ServerFrame::new(
                    "error",
                    None,
                    Some(json!({ "message": format!("malformed frame: {}", e) })),
                ))
                .await;
            return;
        }
    };

    match frame.frame_type.as_str() {
        "ping" => {
            let _ = outbound.send(ServerFrame::new("pong", frame.id, None)).await;
        }
        "execute" => {
            let payload = frame.payload.unwrap_or(json!({}));
            let Some(agent_id) = payload.get("agent_id").and_then(|v| v.as_str()) else {
                let _ = outbound
                    .send(ServerFrame::new(
                        "error",
                        frame.id,
                        Some(json!({ "message": "execute requires payload.agent_id" })),
                    ))
                    .await;
                return;
            };

            let request = SubmitRequest {
                agent_id: agent_id.to_string(),
                input: payload.get("input").cloned().unwrap_or(json!({})),
                tenant: tenant.clone(),
                webhook_url: None,
                priority: payload
                    .get("priority")
                    .and_then(|v| v.as_i64())
                    .map(|p| p as i32),
                idempotency_key: None,
            };

            match state.orchestrator.execute_streaming(request).await {
                Ok((job_id, subscription)) => {
                    let _ = outbound
                        .send(ServerFrame::new(
                            "ack",
                            frame.id,
                            Some(json!({ "job_id": job_id })),
                        ))
                        .await;
                    forwarders.insert(job_id, spawn_forwarder(subscription.receiver, outbound.clone()));
                }
                Err(error) => {
                    let _ = outbound
                        .send(ServerFrame::new(
                            "error",
                            frame.id,
                            Some(json!({
                                "code": error.code(),
                                "message": error.to_string(),
                            })),
                        ))
                        .await;
                }
            }
        }
        "subscribe" => {
            let Some(run_id) = frame
                .payload
                .as_ref()
                .and_then(|p| p.get("run_id"))
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                let _ = outbound
                    .send(ServerFrame::new(
                        "error",
                        frame.id,
                        Some(json!({ "message": "subscribe requires payload.run_id" })),
                    ))
                    .await;
                return;
            };

            let subscription = state
                .orchestrator
                .shared()
                .hub
                .subscribe(run_id, client_id)
                .await;
            forwarders.insert(run_id, spawn_forwarder(subscription.receiver, outbound.clone()));
            let _ = outbound
                .send(ServerFrame::new(
                    "ack",
                    frame.id,
                    Some(json!({ "run_id": run_id })),
                ))
                .await;
        }
        "unsubscribe" => {
            let Some(run_id) = frame
                .payload
                .as_ref()
                .and_then(|p| p.get("run_id"))
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                return;
            };
            if let Some(handle) = forwarders.remove(&run_id) {
                handle.abort();
            }
            state
                .orchestrator
                .shared()
                .hub
                .unsubscribe(run_id, client_id)
                .await;
            let _ = outbound
                .send(ServerFrame::new(
                    "ack",
                    frame.id,
                    Some(json!({ "run_id": run_id })),
                ))
                .await;
        }
        "cancel" => {
            let Some(job_id) = frame
                .payload
                .as_ref()
                .and_then(|p| p.get("job_id"))
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
            else {
                let _ = outbound
                    .send(ServerFrame::new(
                        "error",
                        frame.id,
                        Some(json!({ "message": "cancel requires payload.job_id" })),
                    ))
                    .await;
                return;
            };

            match state.orchestrator.cancel_job(tenant, job_id).await {
                Ok(job) => {
                    let _ = outbound
                        .send(ServerFrame::new(
                            "ack",
                            frame.id,
                            Some(json!({ "job_id": job_id, "status": job.status })),
                        ))
                        .await;
                }
                Err(error) => {
                    let _ = outbound
                        .send(ServerFrame::new(
                            "error",
                            frame.id,
                            Some(json!({
                                "code": error.code(),
                                "message": error.to_string(),
                            })),
                        ))
                        .await;
                }
            }
        }
        other => {
            let _ = outbound
                .send(ServerFrame::new(
                    "error",
                    frame.id,
                    Some(json!({ "message": format!("unknown frame type '{}'", other) })),
                ))
                .await;
        }
    }
}

/// Pump stream events into the socket's outbound queue as `event`
/// frames.
fn spawn_forwarder(
    mut receiver: mpsc::Receiver<StreamEvent>,
    outbound: mpsc::Sender<ServerFrame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            let frame = ServerFrame::new("event", None, Some(json!(event)));
            if outbound.send(frame).await.is_err() {
                return;
            }
        }
    })
}
