//! Stream event model
//!
//! Events flow from executing workers through the stream hub to SSE and
//! WebSocket subscribers, and across the wire to and from external agents.
//! The wire format carries `{type, data, timestamp, seq, request_id}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event types carried end-to-end through the streaming pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    Start,
    Token,
    Chunk,
    ToolCall,
    ToolResult,
    Thinking,
    Progress,
    Error,
    Done,
    Metadata,
}

impl StreamEventType {
    /// Terminal events close the run's fan-out.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEventType::Done | StreamEventType::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamEventType::Start => "start",
            StreamEventType::Token => "token",
            StreamEventType::Chunk => "chunk",
            StreamEventType::ToolCall => "tool_call",
            StreamEventType::ToolResult => "tool_result",
            StreamEventType::Thinking => "thinking",
            StreamEventType::Progress => "progress",
            StreamEventType::Error => "error",
            StreamEventType::Done => "done",
            StreamEventType::Metadata => "metadata",
        }
    }
}

/// One event on a run's stream.
///
/// `seq` is assigned by the stream hub at publication time and is strictly
/// increasing per run. Events constructed before publication carry `seq = 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: StreamEventType,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub seq: u64,
    pub request_id: Uuid,
}

impl StreamEvent {
    pub fn new(event_type: StreamEventType, data: serde_json::Value, request_id: Uuid) -> Self {
        Self {
            event_type,
            data,
            timestamp: Utc::now(),
            seq: 0,
            request_id,
        }
    }

    /// A `start` event announcing the run.
    pub fn start(request_id: Uuid) -> Self {
        Self::new(
            StreamEventType::Start,
            serde_json::json!({ "request_id": request_id }),
            request_id,
        )
    }

    /// A `token` event carrying one piece of streamed text.
    pub fn token(request_id: Uuid, text: impl Into<String>) -> Self {
        Self::new(
            StreamEventType::Token,
            serde_json::json!({ "text": text.into() }),
            request_id,
        )
    }

    /// A `progress` event with a percentage in [0, 100].
    pub fn progress(request_id: Uuid, percent: u8) -> Self {
        Self::new(
            StreamEventType::Progress,
            serde_json::json!({ "percent": percent.min(100) }),
            request_id,
        )
    }

    /// An `error` event; closes the stream on delivery.
    pub fn error(request_id: Uuid, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::new(
            StreamEventType::Error,
            serde_json::json!({ "message": message.into(), "code": code.into() }),
            request_id,
        )
    }

    /// A `done` event carrying the final result, if any.
    pub fn done(request_id: Uuid, result: Option<serde_json::Value>) -> Self {
        Self::new(
            StreamEventType::Done,
            serde_json::json!({ "result": result }),
            request_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips_snake_case() {
        let json = serde_json::to_string(&StreamEventType::ToolCall).unwrap();
        assert_eq!(json, "\"tool_call\"");
        let back: StreamEventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StreamEventType::ToolCall);
    }

    #[test]
    fn terminal_events() {
        assert!(StreamEventType::Done.is_terminal());
        assert!(StreamEventType::Error.is_terminal());
        assert!(!StreamEventType::Token.is_terminal());
        assert!(!StreamEventType::Progress.is_terminal());
    }

    #[test]
    fn progress_clamps_to_100() {
        let event = StreamEvent::progress(Uuid::new_v4(), 250);
        assert_eq!(event.data["percent"], 100);
    }
}
