//! Outbound execution proxy
//!
//! All calls go through the registry's availability gate: a claimed
//! concurrency slot per call, per-attempt metrics feeding the circuit
//! breaker, exponential backoff with jitter between retryable failures,
//! and a strict cap on attempts. Streaming upstreams are parsed as SSE
//! and forwarded event-for-event; synchronous upstreams are bridged to
//! streaming callers as `start` + chunked `token` events + `done`.

use crate::backoff::backoff_delay;
use crate::registry::ExternalAgentRegistry;
use crate::types::*;
use agent_exchange_contracts::{ExchangeError, StreamEvent, StreamEventType};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct ExternalAgentProxy {
    registry: Arc<ExternalAgentRegistry>,
    /// Characters per synthetic `token` event when bridging a
    /// non-streaming upstream to a streaming caller.
    bridge_chunk_chars: usize,
}

enum AttemptError {
    /// Network failure or timeout; always retryable.
    Transport(String),
    /// Upstream responded non-2xx.
    Status { status: u16, body: String },
}

impl ExternalAgentProxy {
    pub fn new(registry: Arc<ExternalAgentRegistry>, bridge_chunk_chars: usize) -> Self {
        Self {
            registry,
            bridge_chunk_chars: bridge_chunk_chars.max(1),
        }
    }

    /// Execute a request against a remote agent with retries.
    pub async fn execute(
        &self,
        agent_id: &str,
        request: &ExecuteRequest,
    ) -> Result<ExecuteResponse, ExchangeError> {
        let config = self.registry.begin_request(agent_id).await?;
        let result = self.execute_attempts(&config, request).await;
        self.registry.end_request(agent_id).await;
        result
    }

    async fn execute_attempts(
        &self,
        config: &ExternalAgentConfig,
        request: &ExecuteRequest,
    ) -> Result<ExecuteResponse, ExchangeError> {
        let max_attempts = config.retry.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let started = Instant::now();
            match self.send_execute(config, request).await {
                Ok(response) => {
                    self.registry
                        .record_success(&config.id, started.elapsed().as_millis() as u64)
                        .await;
                    return Ok(response);
                }
                Err(AttemptError::Transport(message)) => {
                    self.registry.record_failure(&config.id).await;
                    warn!(
                        "Attempt {}/{} to {} failed: {}",
                        attempt, max_attempts, config.id, message
                    );
                    last_error = message;
                }
                Err(AttemptError::Status { status, body }) => {
                    self.registry.record_failure(&config.id).await;
                    if !config.retry.retryable_statuses.contains(&status) {
                        return Err(ExchangeError::UpstreamRejected { status, body });
                    }
                    warn!(
                        "Attempt {}/{} to {} got retryable status {}",
                        attempt, max_attempts, config.id, status
                    );
                    last_error = format!("upstream status {}", status);
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(backoff_delay(&config.retry, attempt)).await;
            }
        }

        Err(ExchangeError::MaxRetriesExceeded {
            attempts: max_attempts,
            last_error,
        })
    }

    async fn send_execute(
        &self,
        config: &ExternalAgentConfig,
        request: &ExecuteRequest,
    ) -> Result<ExecuteResponse, AttemptError> {
        let builder = self
            .registry
            .http()
            .post(config.execute_url())
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .json(request);
        let builder = apply_auth(builder, &config.auth);

        let response = builder
            .send()
            .await
            .map_err(|e| AttemptError::Transport(transport_message(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<ExecuteResponse>()
            .await
            .map_err(|e| AttemptError::Transport(format!("invalid response body: {}", e)))
    }

    /// Execute with streaming passthrough. Events are forwarded to
    /// `writer` preserving type, sequence number, and payload; a `done`
    /// or `error` event ends the stream. Non-streaming upstreams are
    /// bridged synthetically.
    pub async fn execute_streaming(
        &self,
        agent_id: &str,
        request: &ExecuteRequest,
        writer: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ExchangeError> {
        let config = self.registry.begin_request(agent_id).await?;
        let result = match config.streaming {
            StreamingProtocol::Sse => self.stream_sse(&config, request, &writer).await,
            // Chunked and websocket upstreams are bridged like
            // synchronous ones for now.
            _ => self.bridge_sync(&config, request, &writer).await,
        };
        self.registry.end_request(agent_id).await;

        if let Err(error) = &result {
            let event = StreamEvent::error(
                request.request_id,
                error.to_string(),
                error.code().as_str(),
            );
            let _ = writer.send(event).await;
        }
        result
    }

    async fn stream_sse(
        &self,
        config: &ExternalAgentConfig,
        request: &ExecuteRequest,
        writer: &mpsc::Sender<StreamEvent>,
    ) -> Result<(), ExchangeError> {
        let started = Instant::now();
        let builder = self
            .registry
            .http()
            .post(config.stream_url())
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .header("Accept", "text/event-stream")
            .json(request);
        let builder = apply_auth(builder, &config.auth);

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                self.registry.record_failure(&config.id).await;
                debug!("Stream connect to {} failed: {}", config.id, e);
                return Err(ExchangeError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
        };

        let status = response.status();
        if !status.is_success() {
            self.registry.record_failure(&config.id).await;
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::UpstreamRejected {
                status: status.as_u16(),
                body,
            });
        }

        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    self.registry.record_failure(&config.id).await;
                    return Err(ExchangeError::internal(format!("stream read failed: {}", e)));
                }
            };

            let parsed: StreamEvent = match serde_json::from_str(&event.data) {
                Ok(parsed) => parsed,
                Err(e) => {
                    debug!(
                        "Skipping malformed stream frame from {}: {}",
                        config.id, e
                    );
                    continue;
                }
            };

            let terminal = parsed.event_type.is_terminal();
            if writer.send(parsed).await.is_err() {
                // Caller went away; stop reading.
                break;
            }
            if terminal {
                break;
            }
        }

        self.registry
            .record_success(&config.id, started.elapsed().as_millis() as u64)
            .await;
        Ok(())
    }

    /// Bridge a synchronous upstream response into a streaming shape.
    async fn bridge_sync(
        &self,
        config: &ExternalAgentConfig,
        request: &ExecuteRequest,
        writer: &mpsc::Sender<StreamEvent>,
    ) -> Result<(), ExchangeError> {
        let response = self.execute_attempts(config, request).await?;

        let _ = writer.send(StreamEvent::start(request.request_id)).await;

        let text = match &response.result {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let chars: Vec<char> = text.chars().collect();
        for chunk in chars.chunks(self.bridge_chunk_chars) {
            let piece: String = chunk.iter().collect();
            if writer
                .send(StreamEvent::token(request.request_id, piece))
                .await
                .is_err()
            {
                return Ok(());
            }
        }

        let done = StreamEvent::new(
            StreamEventType::Done,
            serde_json::json!({ "result": response.result, "usage": response.usage }),
            request.request_id,
        );
        let _ = writer.send(done).await;
        Ok(())
    }

    /// Best-effort cancel notification to the remote. Local cancellation
    /// never waits on this.
    pub async fn cancel(&self, agent_id: &str, request_id: Uuid) {
        let Some(config) = self.registry.config_of(agent_id).await else {
            return;
        };
        let builder = self
            .registry
            .http()
            .post(config.cancel_url())
            .timeout(Duration::from_millis(config.connect_timeout_ms))
            .json(&serde_json::json!({ "request_id": request_id }));
        let builder = apply_auth(builder, &config.auth);
        if let Err(e) = builder.send().await {
            debug!("Cancel notification to {} failed: {}", agent_id, e);
        }
    }
}

fn apply_auth(builder: reqwest::RequestBuilder, auth: &AuthConfig) -> reqwest::RequestBuilder {
    match auth {
        AuthConfig::None => builder,
        AuthConfig::ApiKey { key, header } => builder.header(header.as_str(), key),
        AuthConfig::Bearer { token } => builder.bearer_auth(token),
        AuthConfig::Basic { username, password } => builder.basic_auth(username, Some(password)),
    }
}

fn transport_message(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> ExecuteRequest {
        ExecuteRequest {
            task: json!("do the thing"),
            stream: false,
            model: None,
            budget: None,
            context: None,
            request_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn unavailable_agent_short_circuits() {
        let registry = ExternalAgentRegistry::new(30_000);
        let proxy = ExternalAgentProxy::new(registry.clone(), 64);

        let err = proxy.execute("ghost", &request()).await.unwrap_err();
        matches!(err, ExchangeError::AgentNotFound { .. });
    }

    #[tokio::test]
    async fn unreachable_upstream_exhausts_retries() {
        let registry = ExternalAgentRegistry::new(30_000);
        let mut config = ExternalAgentConfig::new("a1", "http://127.0.0.1:9");
        config.health_check_interval_seconds = 0;
        config.retry.max_retries = 2;
        config.retry.initial_delay_ms = 1;
        config.retry.max_delay_ms = 2;
        config.connect_timeout_ms = 50;
        config.request_timeout_ms = 100;
        registry.register(config).await.unwrap();

        let proxy = ExternalAgentProxy::new(registry.clone(), 64);
        let err = proxy.execute("a1", &request()).await.unwrap_err();
        match err {
            ExchangeError::MaxRetriesExceeded { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("expected MaxRetriesExceeded, got {:?}", other),
        }

        // Both attempts fed the error metric; the slot was released.
        let snapshot = registry.snapshot("a1").await.unwrap();
        assert_eq!(snapshot.state.total_errors, 2);
        assert_eq!(snapshot.state.active_requests, 0);
    }

    #[tokio::test]
    async fn streaming_failure_emits_error_event() {
        let registry = ExternalAgentRegistry::new(30_000);
        let mut config = ExternalAgentConfig::new("a1", "http://127.0.0.1:9");
        config.health_check_interval_seconds = 0;
        config.streaming = StreamingProtocol::Sse;
        config.connect_timeout_ms = 50;
        config.request_timeout_ms = 100;
        registry.register(config).await.unwrap();

        let proxy = ExternalAgentProxy::new(registry, 64);
        let (sender, mut receiver) = mpsc::channel(16);
        let result = proxy.execute_streaming("a1", &request(), sender).await;
        assert!(result.is_err());

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type, StreamEventType::Error);
    }
}
