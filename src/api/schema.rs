//! `/chats/:id/schema[/refresh]` (§6, §4.C).

use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::Deserialize;

use super::{ok, parse_uuid};
use crate::app::AppState;
use crate::db::Dialect;
use crate::error::Result;
use crate::model::message::LlmContextMessage;
use crate::pipeline::{selected_table_names, Event};
use crate::schema::{diff_schema, SchemaEngine};

#[derive(Deserialize)]
pub struct GetSchemaQuery {
    #[serde(default)]
    pub for_llm: bool,
    #[serde(default)]
    pub with_examples: bool,
}

/// `GET /chats/:id/schema`. Serves the cached schema (re-introspecting only
/// if the live checksum has drifted, §4.C `getSchema`), filtered to the
/// chat's `selectedCollections`. `?forLlm=true` returns the rendered prompt
/// string instead of the structured shape.
pub async fn get(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Query(q): Query<GetSchemaQuery>,
) -> Result<Response> {
    let chat_id = parse_uuid(&chat_id, "chat")?;
    let chat = state.metadata.chats().get(chat_id).await?;
    let entry = state.connections.acquire(chat_id, &chat.connection).await?;
    let selected = selected_table_names(&chat);
    let schema = state
        .schema_engine
        .get_schema(chat_id, entry.executor.as_ref(), selected.as_deref())
        .await;
    state.connections.release(chat_id).await;
    let schema = schema?.filter_selected(&chat.selected_collections);

    if q.for_llm {
        let dialect = Dialect::from_db_type(chat.connection.db_type);
        let rendered = SchemaEngine::format_for_llm(&schema, dialect, q.with_examples && chat.settings.share_data_with_ai);
        Ok(ok(axum::http::StatusCode::OK, rendered))
    } else {
        Ok(ok(axum::http::StatusCode::OK, schema))
    }
}

/// `POST /chats/:id/schema/refresh`. Forces re-introspection, diffs against
/// whatever was cached before, and — if anything changed — records a
/// `schema_update` LLM-context entry and broadcasts `schema_changed` to
/// every open stream on this chat (§4.C `diffSchema`, §4.D
/// `schema_changed`).
pub async fn refresh(State(state): State<AppState>, Path(chat_id): Path<String>) -> Result<Response> {
    let chat_id = parse_uuid(&chat_id, "chat")?;
    let chat = state.metadata.chats().get(chat_id).await?;
    let entry = state.connections.acquire(chat_id, &chat.connection).await?;
    let selected = selected_table_names(&chat);

    let previous = state.schema_engine.previous(chat_id).await;
    state.schema_engine.invalidate(chat_id).await;
    let fresh = state
        .schema_engine
        .get_schema(chat_id, entry.executor.as_ref(), selected.as_deref())
        .await;
    state.connections.release(chat_id).await;
    let fresh = fresh?;

    let diff = diff_schema(previous.as_deref(), &fresh);
    let changed = !diff.is_first_time
        && (!diff.added_tables.is_empty() || !diff.removed_tables.is_empty() || !diff.column_changes.is_empty());
    if changed {
        let summary = format!(
            "added {:?}, removed {:?}, changed {:?}",
            diff.added_tables, diff.removed_tables, diff.column_changes
        );
        state
            .metadata
            .llm_context()
            .append(&LlmContextMessage::schema_update(chat_id, summary.clone()))
            .await?;
        state
            .streams
            .broadcast_to_chat(chat_id, Event::SchemaChanged { summary })
            .await;
    }

    Ok(ok(
        axum::http::StatusCode::OK,
        fresh.filter_selected(&chat.selected_collections),
    ))
}
