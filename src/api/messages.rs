//! `/chats/:id/messages` resource (§6, §4.D).
//!
//! `create` kicks off the Query Pipeline's full run in a background task,
//! returning as soon as the user message is persisted and the stream is
//! registered — progress arrives over the SSE stream the caller opened (or
//! opens next) via `GET /chats/:id/stream?streamID=`.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::{created, ok, parse_uuid};
use crate::app::AppState;
use crate::error::Result;

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    /// Stream id the caller has already opened (or is about to) to receive
    /// this turn's pipeline events (§4.D, §4.E).
    pub stream_id: Uuid,
}

#[derive(Deserialize)]
pub struct ListMessagesQuery {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

/// `POST /chats/:id/messages`.
pub async fn create(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Response> {
    let chat_id = parse_uuid(&chat_id, "chat")?;
    let chat = state.metadata.chats().get(chat_id).await?;

    let pipeline = state.pipeline.clone();
    let content = body.content;
    let stream_id = body.stream_id;
    tokio::spawn(async move {
        if let Err(e) = pipeline.handle_user_message(&chat, &content, stream_id).await {
            tracing::warn!(%stream_id, error = %e, "message pipeline run ended in error");
        }
    });

    Ok(created(serde_json::json!({ "streamId": stream_id })))
}

/// `GET /chats/:id/messages?page&pageSize`. Pagination is applied in memory
/// over the chat's full history — message volume per chat is small relative
/// to a query's result set, which is where real pagination effort goes
/// (§4.D step 2).
pub async fn list(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Query(q): Query<ListMessagesQuery>,
) -> Result<Response> {
    let chat_id = parse_uuid(&chat_id, "chat")?;
    let all = state.metadata.messages().list_for_chat(chat_id).await?;

    let page = q.page.unwrap_or(1).max(1);
    let page_size = q.page_size.unwrap_or(50).max(1) as usize;
    let start = ((page - 1) as usize) * page_size;
    let page_items: Vec<_> = all.into_iter().skip(start).take(page_size).collect();

    Ok(ok(axum::http::StatusCode::OK, page_items))
}

#[derive(Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

/// `PATCH /chats/:id/messages/:mid`. Resets the following assistant
/// message's unexecuted queries (§4.D edge-case policy).
pub async fn edit(
    State(state): State<AppState>,
    Path((_chat_id, message_id)): Path<(String, String)>,
    Json(body): Json<EditMessageRequest>,
) -> Result<Response> {
    let message_id = parse_uuid(&message_id, "message")?;
    state.pipeline.edit_user_message(message_id, &body.content).await?;
    let message = state.metadata.messages().get(message_id).await?;
    Ok(ok(axum::http::StatusCode::OK, message))
}

pub async fn pin(State(state): State<AppState>, Path((_chat_id, message_id)): Path<(String, String)>) -> Result<Response> {
    let message_id = parse_uuid(&message_id, "message")?;
    state.metadata.messages().pin(message_id, true).await?;
    Ok(ok(axum::http::StatusCode::OK, ()))
}

pub async fn unpin(State(state): State<AppState>, Path((_chat_id, message_id)): Path<(String, String)>) -> Result<Response> {
    let message_id = parse_uuid(&message_id, "message")?;
    state.metadata.messages().pin(message_id, false).await?;
    Ok(ok(axum::http::StatusCode::OK, ()))
}
