//! `/.../queries/:qid/visualization` and `/visualizations/:id` (§6, §4.I).

use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

use super::{created, ok, parse_uuid};
use crate::app::AppState;
use crate::db::QueryOutcome;
use crate::error::{NeoBaseError, Result};
use crate::visualization::derive_visualization;

#[derive(Deserialize, Default)]
pub struct CreateVisualizationRequest {
    #[serde(default)]
    pub title: Option<String>,
}

/// `POST /.../queries/:qid/visualization`. Derives a chart config from the
/// query's already-materialized (and encrypted-at-rest) result set; the
/// query is only eligible once it has actually executed (§4.I, §4.J).
pub async fn create(
    State(state): State<AppState>,
    Path((_chat_id, message_id, query_id)): Path<(String, String, String)>,
    body: Option<Json<CreateVisualizationRequest>>,
) -> Result<Response> {
    let message_id = parse_uuid(&message_id, "message")?;
    let query_id = parse_uuid(&query_id, "query")?;

    let mut message = state.metadata.messages().get(message_id).await?;
    let idx = message
        .queries
        .iter()
        .position(|q| q.id == query_id)
        .ok_or_else(|| NeoBaseError::not_found(format!("query {query_id} not found")))?;

    let encrypted = message.queries[idx]
        .execution_result
        .clone()
        .ok_or_else(|| NeoBaseError::conflict("query has no execution result to visualize"))?;
    let decrypted = state.crypto.decrypt(&encrypted)?;
    let outcome: QueryOutcome = serde_json::from_str(&decrypted)
        .map_err(|e| NeoBaseError::internal(format!("corrupt stored execution result: {e}")))?;

    let title = body
        .and_then(|Json(b)| b.title)
        .unwrap_or_else(|| format!("Query {query_id} results"));
    let viz = derive_visualization(query_id, &outcome, title);

    state.metadata.visualizations().create(&viz).await?;
    message.queries[idx].visualization_id = Some(viz.id);
    state.metadata.messages().save_queries(message.id, &message.queries).await?;

    Ok(created(viz))
}

/// `GET /.../queries/:qid/visualization`.
pub async fn get_for_query(
    State(state): State<AppState>,
    Path((_chat_id, _message_id, query_id)): Path<(String, String, String)>,
) -> Result<Response> {
    let query_id = parse_uuid(&query_id, "query")?;
    let viz = state
        .metadata
        .visualizations()
        .get_for_query(query_id)
        .await?
        .ok_or_else(|| NeoBaseError::not_found(format!("no visualization for query {query_id}")))?;
    Ok(ok(axum::http::StatusCode::OK, viz))
}

/// `GET /visualizations/:id`.
pub async fn get_one(State(state): State<AppState>, Path(visualization_id): Path<String>) -> Result<Response> {
    let visualization_id = parse_uuid(&visualization_id, "visualization")?;
    let viz = state.metadata.visualizations().get(visualization_id).await?;
    Ok(ok(axum::http::StatusCode::OK, viz))
}
