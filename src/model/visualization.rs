//! Visualization entity — an AI-assisted chart configuration derived from a
//! query's result set (§4.I).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Chart family the viz subsystem can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Scatter,
    Table,
}

/// A chart configuration bound to one query's result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visualization {
    pub id: Uuid,
    pub query_id: Uuid,
    pub chart_type: ChartType,
    pub title: String,
    pub x_axis_column: Option<String>,
    pub y_axis_columns: Vec<String>,
    /// Raw chart-library config, opaque to the server beyond storage.
    pub config: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Visualization {
    pub fn new(query_id: Uuid, chart_type: ChartType, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            query_id,
            chart_type,
            title: title.into(),
            x_axis_column: None,
            y_axis_columns: Vec::new(),
            config: serde_json::Value::Null,
            created_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_visualization_has_empty_config() {
        let viz = Visualization::new(Uuid::new_v4(), ChartType::Bar, "Revenue by month");
        assert!(viz.config.is_null());
        assert!(viz.y_axis_columns.is_empty());
    }
}
