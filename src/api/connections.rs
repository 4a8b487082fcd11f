//! `/chats/:id/{connect,disconnect,status,tables}` (§6, §4.B).
//!
//! Thin wrappers over the Connection Manager: a request "connecting" holds
//! one subscriber slot on the chat's entry until an explicit `disconnect`
//! releases it (§4.B: "Increments `subscribers`"/"decrements `subscribers`").

use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use super::{ok, parse_uuid};
use crate::app::AppState;
use crate::error::Result;

/// `POST /chats/:id/connect`. Idempotent: reuses a live entry whose config
/// key still matches the chat's connection (§4.B `connect`).
pub async fn connect(State(state): State<AppState>, Path(chat_id): Path<String>) -> Result<Response> {
    let chat_id = parse_uuid(&chat_id, "chat")?;
    let chat = state.metadata.chats().get(chat_id).await?;
    state.connections.acquire(chat_id, &chat.connection).await?;
    let info = state.connections.connection_info(chat_id).await;
    Ok(ok(axum::http::StatusCode::OK, info))
}

#[derive(Deserialize, Default)]
pub struct DisconnectRequest {
    #[serde(default)]
    pub force: bool,
}

/// `POST /chats/:id/disconnect`. `force` closes the entry immediately
/// regardless of remaining subscribers; otherwise just releases this
/// caller's hold, leaving the entry for the idle reaper (§4.B `disconnect`).
pub async fn disconnect(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    body: Option<Json<DisconnectRequest>>,
) -> Result<Response> {
    let chat_id = parse_uuid(&chat_id, "chat")?;
    let force = body.map(|Json(b)| b.force).unwrap_or(false);
    if force {
        state.connections.invalidate(chat_id).await;
    } else {
        state.connections.release(chat_id).await;
    }
    Ok(ok(axum::http::StatusCode::OK, ()))
}

/// `GET /chats/:id/status`. Observation only, never connects (§4.B
/// `getConnectionInfo`/`isConnected`).
pub async fn status(State(state): State<AppState>, Path(chat_id): Path<String>) -> Result<Response> {
    let chat_id = parse_uuid(&chat_id, "chat")?;
    let info = state.connections.connection_info(chat_id).await;
    Ok(ok(axum::http::StatusCode::OK, info))
}

/// `GET /chats/:id/tables`. Connects on demand (via the manager's normal
/// reuse path) and returns the full, unfiltered table list regardless of
/// the chat's `selectedCollections`, so the UI can offer the complete set to
/// pick from.
pub async fn tables(State(state): State<AppState>, Path(chat_id): Path<String>) -> Result<Response> {
    let chat_id = parse_uuid(&chat_id, "chat")?;
    let chat = state.metadata.chats().get(chat_id).await?;
    let entry = state.connections.acquire(chat_id, &chat.connection).await?;
    let schema = entry.executor.introspect_schema(None).await;
    state.connections.release(chat_id).await;
    let schema = schema?;
    let names: Vec<String> = schema.tables.keys().cloned().collect();
    Ok(ok(axum::http::StatusCode::OK, names))
}
