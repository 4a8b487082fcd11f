//! `/chats/:id/messages/:mid/queries/:qid` resource (§6, §4.D, §5).

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::{ok, parse_uuid};
use crate::app::AppState;
use crate::db::Dialect;
use crate::error::{NeoBaseError, Result};
use crate::query::QueryRunner;

#[derive(Deserialize)]
pub struct EditQueryRequest {
    pub query: String,
}

/// `PATCH /.../queries/:qid` (§8 S2).
pub async fn edit(
    State(state): State<AppState>,
    Path((_chat_id, message_id, query_id)): Path<(String, String, String)>,
    Json(body): Json<EditQueryRequest>,
) -> Result<Response> {
    let message_id = parse_uuid(&message_id, "message")?;
    let query_id = parse_uuid(&query_id, "query")?;
    state.pipeline.edit_query(message_id, query_id, &body.query).await?;
    let message = state.metadata.messages().get(message_id).await?;
    let query = message
        .queries
        .into_iter()
        .find(|q| q.id == query_id)
        .ok_or_else(|| NeoBaseError::not_found(format!("query {query_id} not found")))?;
    Ok(ok(axum::http::StatusCode::OK, query))
}

#[derive(Deserialize)]
pub struct ExecuteQueryRequest {
    /// The in-flight stream to post `query_exec_*` events to (§4.D, §4.E).
    pub stream_id: Uuid,
}

/// `POST /.../execute`. Confirms a query left `PENDING_CONFIRMATION` by the
/// auto-execute loop's critical-query gate (§4.D step 1).
pub async fn execute(
    State(state): State<AppState>,
    Path((chat_id, message_id, query_id)): Path<(String, String, String)>,
    Json(body): Json<ExecuteQueryRequest>,
) -> Result<Response> {
    let chat_id = parse_uuid(&chat_id, "chat")?;
    let message_id = parse_uuid(&message_id, "message")?;
    let query_id = parse_uuid(&query_id, "query")?;
    let chat = state.metadata.chats().get(chat_id).await?;
    state
        .pipeline
        .confirm_query(&chat, message_id, query_id, body.stream_id)
        .await?;
    let message = state.metadata.messages().get(message_id).await?;
    Ok(ok(axum::http::StatusCode::OK, message))
}

/// `POST /.../rollback`. Rolls back an already-executed, rollback-eligible
/// query directly, outside the auto-execute loop's own failure-triggered
/// rollback (§4.D step 4).
pub async fn rollback(
    State(state): State<AppState>,
    Path((chat_id, message_id, query_id)): Path<(String, String, String)>,
) -> Result<Response> {
    let chat_id = parse_uuid(&chat_id, "chat")?;
    let message_id = parse_uuid(&message_id, "message")?;
    let query_id = parse_uuid(&query_id, "query")?;

    let chat = state.metadata.chats().get(chat_id).await?;
    let mut message = state.metadata.messages().get(message_id).await?;
    let idx = message
        .queries
        .iter()
        .position(|q| q.id == query_id)
        .ok_or_else(|| NeoBaseError::not_found(format!("query {query_id} not found")))?;

    if !message.queries[idx].can_rollback || !message.queries[idx].is_executed {
        return Err(NeoBaseError::conflict("query is not eligible for rollback"));
    }

    let entry = state.connections.acquire(chat_id, &chat.connection).await?;
    let dialect = Dialect::from_db_type(chat.connection.db_type);
    let runner = QueryRunner::new(entry.executor.as_ref(), state.crypto.as_ref(), dialect);
    let result = runner
        .rollback(&mut message.queries[idx], crate::db::DEFAULT_QUERY_DEADLINE)
        .await;
    state.metadata.messages().save_queries(message.id, &message.queries).await?;
    state.connections.release(chat_id).await;
    result?;

    Ok(ok(axum::http::StatusCode::OK, message.queries[idx].clone()))
}

#[derive(Deserialize)]
pub struct ResultsQuery {
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// `GET /.../results?offset`. Re-runs a SELECT-like query at a new page
/// rather than storing every page ever viewed (§4.D step 2).
pub async fn results(
    State(state): State<AppState>,
    Path((chat_id, message_id, query_id)): Path<(String, String, String)>,
    Query(q): Query<ResultsQuery>,
) -> Result<Response> {
    let chat_id = parse_uuid(&chat_id, "chat")?;
    let message_id = parse_uuid(&message_id, "message")?;
    let query_id = parse_uuid(&query_id, "query")?;

    let chat = state.metadata.chats().get(chat_id).await?;
    let message = state.metadata.messages().get(message_id).await?;
    let query = message
        .queries
        .iter()
        .find(|q| q.id == query_id)
        .ok_or_else(|| NeoBaseError::not_found(format!("query {query_id} not found")))?;

    let page_size = q.limit.unwrap_or(super::super::query::executor::DEFAULT_PAGE_SIZE);
    let offset = q.offset.unwrap_or(0);
    let page = offset / page_size.max(1) + 1;

    let entry = state.connections.acquire(chat_id, &chat.connection).await?;
    let dialect = Dialect::from_db_type(chat.connection.db_type);
    let (paginated, _count_query) = dialect.paginate(&query.statement, page, page_size);
    let outcome = entry
        .executor
        .execute_query(&paginated, query.statement_kind, true, crate::db::DEFAULT_QUERY_DEADLINE)
        .await;
    state.connections.release(chat_id).await;
    let outcome = outcome?;

    Ok(ok(axum::http::StatusCode::OK, outcome))
}
