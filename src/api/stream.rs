//! `GET /chats/:id/stream` and `POST /cancel` (§6, §4.E, §4.F).

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::Response;
use axum::Json;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::{ok, parse_uuid};
use crate::app::AppState;
use crate::error::Result;
use crate::pipeline::Event;

#[derive(Deserialize)]
pub struct SubscribeQuery {
    #[serde(rename = "streamID")]
    pub stream_id: Uuid,
}

/// `GET /chats/:id/stream?streamID=…`. Clients reconnect with the same
/// `streamID` across retries; the hub tolerates multiple concurrent
/// subscribers per chat (§4.E, §6).
pub async fn subscribe(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Query(q): Query<SubscribeQuery>,
) -> Result<Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>>> {
    let chat_id = parse_uuid(&chat_id, "chat")?;
    let rx = state.streams.open(chat_id, q.stream_id).await;
    let frames = ReceiverStream::new(rx).map(|event| Ok(to_sse_frame(&event)));

    Ok(Sse::new(frames).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

/// Renders one pipeline `Event` as `event: <name>\ndata: <json>\n\n` (§6).
/// `Event`'s own `#[serde(tag = "event", content = "data")]` shape already
/// carries both halves, so this just splits them back apart for axum's SSE
/// helper rather than re-deriving the event name by hand.
fn to_sse_frame(event: &Event) -> SseEvent {
    let value = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
    let name = value
        .get("event")
        .and_then(|v| v.as_str())
        .unwrap_or("message")
        .to_string();
    let data = value.get("data").cloned().unwrap_or(serde_json::Value::Null);
    SseEvent::default().event(name).data(data.to_string())
}

#[derive(Deserialize)]
pub struct CancelRequest {
    #[serde(rename = "streamID")]
    pub stream_id: Uuid,
}

/// `POST /cancel?streamID=…`. Idempotent (§4.F): aborts the in-flight LLM
/// call and any running driver execution, terminating the stream with
/// exactly one `cancelled` event (§8 invariant 7, S6).
pub async fn cancel(State(state): State<AppState>, Json(body): Json<CancelRequest>) -> Result<Response> {
    state.pipeline.cancel(body.stream_id).await;
    Ok(ok(axum::http::StatusCode::OK, ()))
}
