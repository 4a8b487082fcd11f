//! Table creation and batch insert (§4.G "Storage").
//!
//! Identifiers are never schema-qualified here: every `Executor` this module
//! is driven through (the spreadsheet backing store, `db::spreadsheet`) is
//! already pinned to the chat's `conn_<chatID>` schema via `search_path`, the
//! same convention `SpreadsheetExecutor::sample_rows`/`introspect_schema` rely
//! on.

use crate::db::{Executor, Value, DEFAULT_QUERY_DEADLINE};
use crate::error::Result;
use crate::model::query::StatementKind;

use super::types::{convert_cell, InferredType};

/// Rows inserted per `INSERT` statement (§4.G, default 100).
pub const BATCH_SIZE: usize = 100;

/// Columns every ingested table carries regardless of inferred schema
/// (§4.G "Storage").
pub const RESERVED_COLUMNS: &[&str] = &["_row_id", "_imported_at", "_quality_score"];

#[derive(Debug, Clone)]
pub struct IngestedTable {
    pub name: String,
    pub columns: Vec<(String, InferredType)>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RowIngestOutcome {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
}

impl RowIngestOutcome {
    fn merge(self, other: RowIngestOutcome) -> RowIngestOutcome {
        RowIngestOutcome {
            processed: self.processed + other.processed,
            successful: self.successful + other.successful,
            failed: self.failed + other.failed,
        }
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn escape_string(s: &str) -> String {
    s.replace('\'', "''")
}

pub fn value_literal(v: &Value) -> String {
    match v {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => format!("'{}'", escape_string(s)),
        Value::Bytes(_) | Value::Array(_) | Value::Object(_) => {
            format!("'{}'", escape_string(&v.to_display_string()))
        }
    }
}

pub async fn create_table(executor: &dyn Executor, table: &IngestedTable, include_quality_score: bool) -> Result<()> {
    let mut columns = vec![
        "_row_id BIGSERIAL PRIMARY KEY".to_string(),
        "_imported_at TIMESTAMPTZ NOT NULL DEFAULT now()".to_string(),
    ];
    if include_quality_score {
        columns.push("_quality_score DOUBLE PRECISION".to_string());
    }
    columns.extend(table.columns.iter().map(|(name, ty)| format!("{} {}", quote_ident(name), ty.sql_type())));

    let sql = format!("CREATE TABLE IF NOT EXISTS {} ({})", quote_ident(&table.name), columns.join(", "));
    executor.execute_query(&sql, StatementKind::Ddl, false, DEFAULT_QUERY_DEADLINE).await?;
    Ok(())
}

pub async fn drop_table(executor: &dyn Executor, table_name: &str) -> Result<()> {
    let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(table_name));
    executor.execute_query(&sql, StatementKind::Ddl, false, DEFAULT_QUERY_DEADLINE).await?;
    Ok(())
}

/// Converts one raw grid row against `table`'s inferred column types.
/// Returns the converted row plus whether every cell converted cleanly;
/// failing cells become `Value::Null` rather than dropping the row (§4.G).
pub fn convert_row(table: &IngestedTable, row: &[Value]) -> (Vec<Value>, bool) {
    let mut ok = true;
    let converted = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            let cell = row.get(i).cloned().unwrap_or(Value::Null);
            match convert_cell(&cell, *ty) {
                Some(v) => v,
                None => {
                    tracing::warn!(column = %name, "ingestion: cell failed type conversion, storing NULL");
                    ok = false;
                    Value::Null
                }
            }
        })
        .collect();
    (converted, ok)
}

/// Batch-inserts already-converted rows (one `INSERT` per `BATCH_SIZE`
/// rows), with no further type conversion.
pub async fn insert_converted_batches(
    executor: &dyn Executor,
    table: &IngestedTable,
    rows: &[Vec<Value>],
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let col_idents: Vec<String> = table.columns.iter().map(|(n, _)| quote_ident(n)).collect();

    for batch in rows.chunks(BATCH_SIZE) {
        let value_rows: Vec<String> = batch
            .iter()
            .map(|row| format!("({})", row.iter().map(value_literal).collect::<Vec<_>>().join(", ")))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_ident(&table.name),
            col_idents.join(", "),
            value_rows.join(", ")
        );
        executor.execute_query(&sql, StatementKind::Dml, false, DEFAULT_QUERY_DEADLINE).await?;
    }
    Ok(())
}

/// Converts and inserts raw grid rows, returning the `{processed, successful,
/// failed}` counters §4.G specifies.
pub async fn insert_rows(executor: &dyn Executor, table: &IngestedTable, raw_rows: &[Vec<Value>]) -> Result<RowIngestOutcome> {
    let mut outcome = RowIngestOutcome::default();
    let mut converted = Vec::with_capacity(raw_rows.len());
    for row in raw_rows {
        let (conv, ok) = convert_row(table, row);
        outcome = outcome.merge(RowIngestOutcome {
            processed: 1,
            successful: ok as usize,
            failed: (!ok) as usize,
        });
        converted.push(conv);
    }
    insert_converted_batches(executor, table, &converted).await?;
    Ok(outcome)
}
