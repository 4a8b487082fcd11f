//! Visualization subsystem (§4.I).
//!
//! Derives a chart configuration from one query's result set: which column
//! is the category axis, which columns are numeric series, and which chart
//! family fits the shape. The result is a heuristic, not an LLM call — the
//! pipeline keeps the LLM scoped to SQL generation (§4.C) and hands the
//! already-materialized rows here once a query finishes.

use crate::db::{ColumnInfo, QueryOutcome, Value};
use crate::model::visualization::{ChartType, Visualization};

/// Caps the number of rows considered when deriving a configuration; large
/// result sets are paginated by the query pipeline already (§4.D step 2), so
/// visualization only ever looks at one page at a time.
const MAX_SAMPLE_ROWS: usize = 500;

/// True if every sampled value in `rows` at `col_idx` is numeric or null.
fn is_numeric_column(rows: &[Vec<Value>], col_idx: usize) -> bool {
    rows.iter()
        .filter_map(|row| row.get(col_idx))
        .all(|v| matches!(v, Value::Int(_) | Value::Float(_) | Value::Null))
}

/// Picks the chart family from the shape of the numeric/non-numeric split
/// (§4.I: "a chart family inferred from column count and types").
fn infer_chart_type(numeric_count: usize, categorical_count: usize, row_count: usize) -> ChartType {
    match (categorical_count, numeric_count) {
        (0, _) => ChartType::Table,
        (_, 0) => ChartType::Table,
        (1, 1) if row_count <= 12 => ChartType::Pie,
        (1, n) if n >= 1 => ChartType::Bar,
        _ => ChartType::Table,
    }
}

/// Derives a `Visualization` from a completed query's result columns and a
/// sample of its rows. Lazy loading/pagination (§4.I) is the caller's
/// concern — this only ever inspects the page it's given.
pub fn derive_visualization(query_id: uuid::Uuid, outcome: &QueryOutcome, title: impl Into<String>) -> Visualization {
    let sample: &[Vec<Value>] = if outcome.rows.len() > MAX_SAMPLE_ROWS {
        &outcome.rows[..MAX_SAMPLE_ROWS]
    } else {
        &outcome.rows
    };

    let numeric_cols: Vec<usize> = (0..outcome.columns.len())
        .filter(|&i| is_numeric_column(sample, i))
        .collect();
    let categorical_cols: Vec<usize> = (0..outcome.columns.len())
        .filter(|i| !numeric_cols.contains(i))
        .collect();

    let chart_type = infer_chart_type(numeric_cols.len(), categorical_cols.len(), sample.len());

    let mut viz = Visualization::new(query_id, chart_type, title);
    viz.x_axis_column = categorical_cols
        .first()
        .and_then(|&i| outcome.columns.get(i))
        .map(|c: &ColumnInfo| c.name.clone());
    viz.y_axis_columns = numeric_cols
        .iter()
        .filter_map(|&i| outcome.columns.get(i).map(|c| c.name.clone()))
        .collect();
    viz.config = serde_json::json!({
        "chartType": chart_type_label(chart_type),
        "xAxis": viz.x_axis_column,
        "yAxis": viz.y_axis_columns,
        "sampledRows": sample.len(),
        "totalRows": outcome.total_count,
    });
    viz
}

fn chart_type_label(t: ChartType) -> &'static str {
    match t {
        ChartType::Bar => "bar",
        ChartType::Line => "line",
        ChartType::Pie => "pie",
        ChartType::Scatter => "scatter",
        ChartType::Table => "table",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(columns: Vec<(&str, &str)>, rows: Vec<Vec<Value>>) -> QueryOutcome {
        QueryOutcome::with_rows(
            columns.into_iter().map(|(n, t)| ColumnInfo::new(n, t)).collect(),
            rows,
        )
    }

    #[test]
    fn test_one_category_one_numeric_small_row_count_is_pie() {
        let out = outcome(
            vec![("region", "text"), ("revenue", "numeric")],
            vec![
                vec![Value::String("east".into()), Value::Int(10)],
                vec![Value::String("west".into()), Value::Int(20)],
            ],
        );
        let viz = derive_visualization(uuid::Uuid::new_v4(), &out, "Revenue by region");
        assert_eq!(viz.chart_type, ChartType::Pie);
        assert_eq!(viz.x_axis_column.as_deref(), Some("region"));
        assert_eq!(viz.y_axis_columns, vec!["revenue".to_string()]);
    }

    #[test]
    fn test_one_category_many_numeric_is_bar() {
        let out = outcome(
            vec![("month", "text"), ("revenue", "numeric"), ("cost", "numeric")],
            (0..20)
                .map(|i| vec![Value::String(format!("m{i}")), Value::Int(i), Value::Int(i * 2)])
                .collect(),
        );
        let viz = derive_visualization(uuid::Uuid::new_v4(), &out, "Revenue vs cost");
        assert_eq!(viz.chart_type, ChartType::Bar);
        assert_eq!(viz.y_axis_columns.len(), 2);
    }

    #[test]
    fn test_all_numeric_falls_back_to_table() {
        let out = outcome(
            vec![("a", "numeric"), ("b", "numeric")],
            vec![vec![Value::Int(1), Value::Int(2)]],
        );
        let viz = derive_visualization(uuid::Uuid::new_v4(), &out, "Raw numbers");
        assert_eq!(viz.chart_type, ChartType::Table);
        assert!(viz.x_axis_column.is_none());
    }

    #[test]
    fn test_config_carries_pagination_context() {
        let mut out = outcome(
            vec![("region", "text"), ("revenue", "numeric")],
            vec![vec![Value::String("east".into()), Value::Int(10)]],
        );
        out.total_count = Some(1000);
        let viz = derive_visualization(uuid::Uuid::new_v4(), &out, "Revenue");
        assert_eq!(viz.config["totalRows"], serde_json::json!(1000));
    }
}
