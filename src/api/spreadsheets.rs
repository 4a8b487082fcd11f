//! `/chats/:id/spreadsheets[/:table]` (§6, §4.G).

use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{created, ok, parse_uuid};
use crate::app::AppState;
use crate::db::{Value, DEFAULT_QUERY_DEADLINE};
use crate::error::Result;
use crate::ingestion::storage::quote_ident;
use crate::ingestion::{ingest_grid, IngestOptions, IngestSource, MergeOptions, MergeStrategy};
use crate::model::query::StatementKind;

const DOWNLOAD_ROW_LIMIT: u32 = 10_000;

#[derive(Deserialize)]
pub struct UploadRequest {
    #[serde(rename = "tableName")]
    pub table_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    #[serde(rename = "mergeStrategy", default)]
    pub merge_strategy: MergeStrategy,
    #[serde(rename = "mergeOptions", default)]
    pub merge_options: MergeOptions,
}

#[derive(Serialize)]
struct UploadResponse {
    #[serde(rename = "tableName")]
    table_name: String,
    #[serde(rename = "rowCount")]
    row_count: usize,
    #[serde(rename = "columnCount")]
    column_count: usize,
    #[serde(rename = "totalRowsProcessed")]
    total_rows_processed: usize,
    #[serde(rename = "successfulRows")]
    successful_rows: usize,
    #[serde(rename = "failedRows")]
    failed_rows: usize,
}

/// `POST /chats/:id/spreadsheets`. Ingests an explicit `{tableName, columns,
/// rows}` grid into the chat's `conn_<chatID>` backing schema (§4.G), using
/// the caller's chosen merge strategy against any existing table of the same
/// name (§4.G "Merge Strategies").
pub async fn upload(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(body): Json<UploadRequest>,
) -> Result<Response> {
    let chat_id = parse_uuid(&chat_id, "chat")?;
    let chat = state.metadata.chats().get(chat_id).await?;
    let entry = state.connections.acquire(chat_id, &chat.connection).await?;

    let grid: Vec<Vec<Value>> = std::iter::once(body.columns.iter().cloned().map(Value::String).collect())
        .chain(
            body.rows
                .iter()
                .map(|row| row.iter().map(Value::from_json).collect::<Vec<Value>>()),
        )
        .collect();

    let options = IngestOptions {
        table_name: Some(body.table_name.clone()),
        explicit_columns: Some(body.columns.clone()),
        merge_strategy: body.merge_strategy,
        merge_options: body.merge_options,
        ..IngestOptions::default()
    };

    let summary = ingest_grid(entry.executor.as_ref(), IngestSource::Upload, grid, options).await;
    state.connections.release(chat_id).await;
    let summary = summary?;

    let table = summary.tables.first();
    let response = UploadResponse {
        table_name: table.map(|t| t.table_name.clone()).unwrap_or(body.table_name),
        row_count: table.map(|t| t.successful).unwrap_or(0),
        column_count: body.columns.len(),
        total_rows_processed: summary.total_processed(),
        successful_rows: summary.tables.iter().map(|t| t.successful).sum(),
        failed_rows: summary.total_failed(),
    };
    Ok(created(response))
}

/// `GET /chats/:id/spreadsheets`. Lists every table currently ingested into
/// this chat's backing schema.
pub async fn list(State(state): State<AppState>, Path(chat_id): Path<String>) -> Result<Response> {
    let chat_id = parse_uuid(&chat_id, "chat")?;
    let chat = state.metadata.chats().get(chat_id).await?;
    let entry = state.connections.acquire(chat_id, &chat.connection).await?;
    let schema = entry.executor.introspect_schema(None).await;
    state.connections.release(chat_id).await;
    let schema = schema?;

    let names: Vec<String> = schema.tables.keys().cloned().collect();
    Ok(ok(axum::http::StatusCode::OK, names))
}

#[derive(Serialize)]
struct TableDump {
    columns: Vec<String>,
    rows: Vec<Vec<serde_json::Value>>,
}

/// `GET /chats/:id/spreadsheets/:table`. Dumps up to
/// [`DOWNLOAD_ROW_LIMIT`] rows of one ingested table.
pub async fn download(
    State(state): State<AppState>,
    Path((chat_id, table)): Path<(String, String)>,
) -> Result<Response> {
    let chat_id = parse_uuid(&chat_id, "chat")?;
    let chat = state.metadata.chats().get(chat_id).await?;
    let entry = state.connections.acquire(chat_id, &chat.connection).await?;

    let schema = entry.executor.introspect_schema(Some(std::slice::from_ref(&table))).await;
    let rows = entry.executor.sample_rows(&table, DOWNLOAD_ROW_LIMIT).await;
    state.connections.release(chat_id).await;
    let schema = schema?;
    let rows = rows?;

    let columns = schema
        .tables
        .get(&table)
        .map(|t| t.columns.iter().map(|(name, _)| name.clone()).collect())
        .unwrap_or_default();
    let dump = TableDump {
        columns,
        rows: rows.into_iter().map(|row| row.iter().map(Value::to_json).collect()).collect(),
    };
    Ok(ok(axum::http::StatusCode::OK, dump))
}

/// `DELETE /chats/:id/spreadsheets/:table`. Drops one ingested table.
pub async fn delete(
    State(state): State<AppState>,
    Path((chat_id, table)): Path<(String, String)>,
) -> Result<Response> {
    let chat_id = parse_uuid(&chat_id, "chat")?;
    let chat = state.metadata.chats().get(chat_id).await?;
    let entry = state.connections.acquire(chat_id, &chat.connection).await?;

    let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(&table));
    let result = entry
        .executor
        .execute_query(&sql, StatementKind::Ddl, false, DEFAULT_QUERY_DEADLINE)
        .await;
    state.connections.release(chat_id).await;
    result?;

    Ok(ok(axum::http::StatusCode::OK, ()))
}

#[cfg(test)]
mod tests {
    // Exercised end-to-end against a live database in tests/integration/.
}
