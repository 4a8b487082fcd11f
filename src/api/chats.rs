//! `/chats` resource (§6): CRUD over a user's chats, each bound to one
//! `ConnectionDescriptor`.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use super::{created, ok, parse_uuid, user_id};
use crate::app::AppState;
use crate::db;
use crate::error::{NeoBaseError, Result};
use crate::model::chat::{Chat, ChatSettings, SelectedCollections};
use crate::model::connection::ConnectionDescriptor;

#[derive(Deserialize)]
pub struct CreateChatRequest {
    pub name: String,
    pub connection: ConnectionDescriptor,
    #[serde(default)]
    pub selected_collections: Option<SelectedCollections>,
    #[serde(default)]
    pub settings: Option<ChatSettings>,
}

#[derive(Deserialize)]
pub struct UpdateChatRequest {
    pub name: Option<String>,
    pub connection: Option<ConnectionDescriptor>,
    pub selected_collections: Option<SelectedCollections>,
    pub settings: Option<ChatSettings>,
}

/// `POST /chats`. Runs `testConnection` before persisting anything (§8 S1):
/// a descriptor that can't connect never becomes a chat, and the classified
/// `driver.*` error reaches the client unchanged.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateChatRequest>,
) -> Result<Response> {
    let owner = user_id(&headers)?;

    let existing = state.metadata.chats().count_for_user(owner).await?;
    if existing >= state.config.effective_chat_cap() {
        return Err(NeoBaseError::conflict("chat limit reached for this user"));
    }

    let probe = db::connect(&body.connection).await?;
    probe.disconnect().await?;

    let mut chat = Chat::new(owner, body.name, body.connection);
    if let Some(selected) = body.selected_collections {
        chat.selected_collections = selected;
    }
    if let Some(settings) = body.settings {
        chat.settings = settings;
    }

    state.metadata.chats().create(&chat).await?;
    Ok(created(chat))
}

pub async fn list(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let owner = user_id(&headers)?;
    let chats = state.metadata.chats().list_for_user(owner).await?;
    Ok(ok(axum::http::StatusCode::OK, chats))
}

pub async fn get_one(State(state): State<AppState>, Path(chat_id): Path<String>) -> Result<Response> {
    let chat_id = parse_uuid(&chat_id, "chat")?;
    let chat = state.metadata.chats().get(chat_id).await?;
    Ok(ok(axum::http::StatusCode::OK, chat))
}

/// `PATCH /chats/:id`. A `connection` replacement bumps
/// `connectionGeneration`, invalidating the chat's cached schema and live
/// `ConnectionManager` entry so the next request reconnects fresh (§4.A,
/// §4.B).
pub async fn update(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(body): Json<UpdateChatRequest>,
) -> Result<Response> {
    let chat_id = parse_uuid(&chat_id, "chat")?;

    if let Some(connection) = body.connection {
        let probe = db::connect(&connection).await?;
        probe.disconnect().await?;
        state.metadata.chats().replace_connection(chat_id, &connection).await?;
        state.connections.invalidate(chat_id).await;
        state.schema_engine.invalidate(chat_id).await;
    }

    if let Some(selected) = body.selected_collections {
        state
            .metadata
            .chats()
            .update_selected_collections(chat_id, &selected)
            .await?;
        state.schema_engine.invalidate(chat_id).await;
    }

    if let Some(settings) = body.settings {
        state.metadata.chats().update_settings(chat_id, &settings).await?;
    }

    let chat = state.metadata.chats().get(chat_id).await?;
    Ok(ok(axum::http::StatusCode::OK, chat))
}

pub async fn delete(State(state): State<AppState>, Path(chat_id): Path<String>) -> Result<Response> {
    let chat_id = parse_uuid(&chat_id, "chat")?;
    state.connections.invalidate(chat_id).await;
    state.schema_engine.invalidate(chat_id).await;
    state.metadata.chats().delete(chat_id).await?;
    Ok(ok(axum::http::StatusCode::NO_CONTENT, ()))
}
