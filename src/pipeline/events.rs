//! Wire events emitted onto a `streamID`'s channel as a message moves
//! through the pipeline's state machine (§4.D, §6).
//!
//! Each variant's `event:` name (used by the SSE handler) is its
//! `snake_case` tag; the payload is whatever the handler renders as the
//! frame's `data:` JSON.

use serde::Serialize;
use uuid::Uuid;

use crate::model::query::Query;

/// One frame on a `streamID`'s event channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    MessageCreated { message_id: Uuid },
    LlmStarted,
    LlmToken { token: String },
    LlmFinished { explanation: Option<String> },
    QueriesProposed { queries: Vec<Query> },
    QueryExecStarted { query_id: Uuid },
    QueryExecProgress { query_id: Uuid, detail: String },
    QueryExecFinished { query_id: Uuid, query: Query },
    SchemaChanged { summary: String },
    Error { code: &'static str, message: String },
    Cancelled,
    Done,
}

impl Event {
    /// True for the three states that end a stream (§4.E: "keeps the
    /// channel open until `done|cancelled|error`").
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(Event::Done.is_terminal());
        assert!(Event::Cancelled.is_terminal());
        assert!(Event::Error {
            code: "upstream",
            message: "x".into()
        }
        .is_terminal());
        assert!(!Event::LlmStarted.is_terminal());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_string(&Event::LlmStarted).unwrap();
        assert_eq!(json, r#"{"event":"llm_started"}"#);
    }
}
