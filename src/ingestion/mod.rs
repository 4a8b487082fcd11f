//! Spreadsheet Ingestion Core (§4.G).
//!
//! The hardest sub-subsystem: turns an opaque 2-D grid of cells into one or
//! more relational tables in the chat's backing schema. A single entry point,
//! [`ingest_grid`], serves both the direct upload path and the sheet-to-
//! relations sync gate `db::spreadsheet` drives on connect (SPEC_FULL.md
//! §C.2: the two near-duplicate ingestion entry points the distilled spec
//! carried collapse into one function discriminated by [`IngestSource`]).

mod classify;
mod header;
mod merge;
mod region;
pub mod storage;
mod types;

pub use classify::RegionKind;
pub use merge::{MergeOptions, MergeStrategy};
pub use region::Grid;
pub use storage::{IngestedTable, RowIngestOutcome};
pub use types::InferredType;

use crate::db::{Executor, Value};
use crate::error::Result;

use classify::classify as classify_region;
use header::{
    column_letter, infer_headers, key_value_headers, list_headers, matrix_headers, pivot_headers,
    sanitize_ident, triple_headers,
};
use region::{detect_regions, region_rows, Region};
use types::infer_column_types;

/// Default empty row/column gap tolerated when flood-filling regions
/// (§4.G, default 3 each).
pub const DEFAULT_GAP_TOLERANCE: usize = 3;

/// Distinguishes the two callers of [`ingest_grid`] for logging/telemetry;
/// both run the identical pipeline (SPEC_FULL.md §C.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestSource {
    /// A user-initiated spreadsheet upload.
    Upload,
    /// The on-connect sheet-to-relations sync gate (§4.A).
    SheetsSync,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Skips region detection and treats the whole grid as one structured
    /// table under this name, as the explicit `{tableName, columns, rows}`
    /// upload shape does.
    pub table_name: Option<String>,
    /// Skips header inference in favor of caller-supplied column names.
    pub explicit_columns: Option<Vec<String>>,
    pub merge_strategy: MergeStrategy,
    pub merge_options: MergeOptions,
    pub row_gap: usize,
    pub col_gap: usize,
    /// Store a `_quality_score` column alongside each ingested table.
    pub include_quality_score: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            table_name: None,
            explicit_columns: None,
            merge_strategy: MergeStrategy::Replace,
            merge_options: MergeOptions::default(),
            row_gap: DEFAULT_GAP_TOLERANCE,
            col_gap: DEFAULT_GAP_TOLERANCE,
            include_quality_score: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableIngestResult {
    pub table_name: String,
    pub kind: RegionKind,
    pub column_count: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct IngestSummary {
    pub tables: Vec<TableIngestResult>,
}

impl IngestSummary {
    pub fn total_processed(&self) -> usize {
        self.tables.iter().map(|t| t.processed).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.tables.iter().map(|t| t.failed).sum()
    }
}

/// Ingests one grid into zero or more relational tables (§4.G). `executor`
/// must already be scoped to the destination schema (`conn_<chatID>`, see
/// `db::spreadsheet`).
pub async fn ingest_grid(
    executor: &dyn Executor,
    source: IngestSource,
    grid: Grid,
    options: IngestOptions,
) -> Result<IngestSummary> {
    let regions = if options.table_name.is_some() {
        let rows = grid.len();
        let cols = grid.iter().map(|r| r.len()).max().unwrap_or(0);
        if rows == 0 || cols == 0 {
            Vec::new()
        } else {
            vec![Region { top: 0, left: 0, bottom: rows - 1, right: cols - 1 }]
        }
    } else {
        detect_regions(&grid, options.row_gap, options.col_gap)
    };

    tracing::debug!(
        ?source,
        region_count = regions.len(),
        "ingestion: regions detected"
    );

    let mut results = Vec::with_capacity(regions.len());
    for (idx, region) in regions.into_iter().enumerate() {
        let kind = classify_region(&grid, &region);
        let (headers, data_rows) = extract_table(&grid, &region, kind, options.explicit_columns.as_deref());

        let table_name = options
            .table_name
            .clone()
            .unwrap_or_else(|| format!("sheet_{}", idx + 1));
        let types = infer_column_types(&data_rows, headers.len());
        let table = IngestedTable {
            name: sanitize_ident(&table_name),
            columns: headers.into_iter().zip(types).collect(),
        };

        let outcome = merge::apply_strategy(
            executor,
            &table,
            data_rows,
            options.merge_strategy,
            &options.merge_options,
        )
        .await?;

        results.push(TableIngestResult {
            table_name: table.name.clone(),
            kind,
            column_count: table.columns.len(),
            processed: outcome.processed,
            successful: outcome.successful,
            failed: outcome.failed,
        });
    }

    Ok(IngestSummary { tables: results })
}

/// Produces `(headers, data_rows)` for one region per its classification
/// (§4.G "Header strategy", "Pivot/matrix/semi-structured").
fn extract_table(
    grid: &Grid,
    region: &Region,
    kind: RegionKind,
    explicit_columns: Option<&[String]>,
) -> (Vec<String>, Vec<Vec<Value>>) {
    if let Some(columns) = explicit_columns {
        return (columns.to_vec(), region_rows(grid, region));
    }

    match kind {
        RegionKind::Structured => {
            let rows = region_rows(grid, region);
            let (header_row_idx, headers) = infer_headers(&rows);
            let data_rows = rows
                .into_iter()
                .enumerate()
                .filter(|(i, _)| *i != header_row_idx)
                .map(|(_, r)| r)
                .collect();
            (headers, data_rows)
        }
        RegionKind::Pivot => {
            let rows = region_rows(grid, region);
            if rows.len() < 2 {
                return (pivot_headers(region.width()), Vec::new());
            }
            let headers = pivot_headers(region.width());
            let data_rows = rows.into_iter().skip(1).collect();
            (headers, data_rows)
        }
        RegionKind::Matrix => {
            let rows = region_rows(grid, region);
            (matrix_headers(region.width()), rows)
        }
        RegionKind::SemiStructured => semi_structured_table(grid, region),
    }
}

/// Semi-structured data is further split by width: two columns become
/// `{key, value}`, one column becomes `{item}`, and anything wider falls
/// back to per-cell `{row_num, col_letter, value}` triples (§4.G).
fn semi_structured_table(grid: &Grid, region: &Region) -> (Vec<String>, Vec<Vec<Value>>) {
    let rows = region_rows(grid, region);
    match region.width() {
        2 => (key_value_headers(), rows),
        1 => (list_headers(), rows),
        _ => {
            let mut triples = Vec::new();
            for (r, row) in rows.iter().enumerate() {
                for (c, cell) in row.iter().enumerate() {
                    if region::is_empty_cell(cell) {
                        continue;
                    }
                    triples.push(vec![
                        Value::Int((region.top + r + 1) as i64),
                        Value::String(column_letter(region.left + c)),
                        cell.clone(),
                    ]);
                }
            }
            (triple_headers(), triples)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ColumnInfo, QueryOutcome};
    use crate::model::query::StatementKind;
    use std::sync::Mutex;
    use std::time::Duration;

    fn s(v: &str) -> Value {
        Value::String(v.to_string())
    }

    /// Records every statement executed against it; fine-grained enough to
    /// assert CREATE/INSERT shape without a live database.
    #[derive(Default)]
    struct RecordingExecutor {
        statements: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Executor for RecordingExecutor {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        async fn is_alive(&self) -> bool {
            true
        }
        async fn execute_query(
            &self,
            sql: &str,
            _kind: StatementKind,
            _find_count: bool,
            _deadline: Duration,
        ) -> Result<QueryOutcome> {
            self.statements.lock().unwrap().push(sql.to_string());
            Ok(QueryOutcome::with_rows(Vec::<ColumnInfo>::new(), Vec::new()))
        }
        async fn begin_tx(&self) -> Result<Box<dyn crate::db::Tx>> {
            unimplemented!("not exercised by ingestion tests")
        }
        async fn introspect_schema(&self, _selected_tables: Option<&[String]>) -> Result<crate::schema::SchemaInfo> {
            Ok(crate::schema::SchemaInfo::finalize(Default::default()))
        }
        async fn table_checksum(&self, _table: &str) -> Result<String> {
            Ok(String::new())
        }
        async fn sample_rows(&self, _table: &str, _limit: u32) -> Result<Vec<crate::db::Row>> {
            Ok(Vec::new())
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_ingest_grid_structured_creates_and_inserts() {
        let grid = vec![
            vec![s("id"), s("name")],
            vec![s("1"), s("alice")],
            vec![s("2"), s("bob")],
        ];
        let executor = RecordingExecutor::default();
        let summary = ingest_grid(&executor, IngestSource::Upload, grid, IngestOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.tables.len(), 1);
        assert_eq!(summary.tables[0].processed, 2);
        assert_eq!(summary.tables[0].successful, 2);

        let statements = executor.statements.lock().unwrap();
        assert!(statements.iter().any(|s| s.starts_with("DROP TABLE")));
        assert!(statements.iter().any(|s| s.starts_with("CREATE TABLE")));
        assert!(statements.iter().any(|s| s.starts_with("INSERT INTO")));
    }

    #[tokio::test]
    async fn test_ingest_grid_with_explicit_table_name_skips_region_detection() {
        let grid = vec![vec![s("1"), s("2")], vec![s("3"), s("4")]];
        let executor = RecordingExecutor::default();
        let options = IngestOptions {
            table_name: Some("My Sheet!".to_string()),
            explicit_columns: Some(vec!["a".to_string(), "b".to_string()]),
            ..IngestOptions::default()
        };
        let summary = ingest_grid(&executor, IngestSource::SheetsSync, grid, options).await.unwrap();
        assert_eq!(summary.tables.len(), 1);
        assert_eq!(summary.tables[0].table_name, "my_sheet");
        assert_eq!(summary.tables[0].processed, 2);
    }

    #[tokio::test]
    async fn test_ingest_grid_empty_produces_no_tables() {
        let executor = RecordingExecutor::default();
        let summary = ingest_grid(&executor, IngestSource::Upload, Vec::new(), IngestOptions::default())
            .await
            .unwrap();
        assert!(summary.tables.is_empty());
    }

    #[test]
    fn test_semi_structured_key_value_split() {
        let grid = vec![vec![s("revenue"), s("100")], vec![s("cost"), s("50")]];
        let region = Region { top: 0, left: 0, bottom: 1, right: 1 };
        let (headers, rows) = semi_structured_table(&grid, &region);
        assert_eq!(headers, vec!["key", "value"]);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_semi_structured_triples_for_wide_unstructured_data() {
        let grid = vec![vec![s("a"), Value::Null, s("c")], vec![Value::Null, s("b"), Value::Null]];
        let region = Region { top: 0, left: 0, bottom: 1, right: 2 };
        let (headers, rows) = semi_structured_table(&grid, &region);
        assert_eq!(headers, vec!["row_num", "col_letter", "value"]);
        assert_eq!(rows.len(), 3);
    }
}
