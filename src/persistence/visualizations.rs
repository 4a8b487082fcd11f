//! Visualization repository (§3, §4.I, §4.H).
//!
//! Chart configurations are persisted independently of the query they're
//! derived from and linked back by id (§9 "the visualization links back by
//! id, never by shared owning reference").

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{NeoBaseError, Result};
use crate::model::visualization::{ChartType, Visualization};

pub struct VisualizationRepo<'a> {
    pool: &'a PgPool,
}

#[derive(sqlx::FromRow)]
struct VisualizationRow {
    id: Uuid,
    query_id: Uuid,
    chart_type: String,
    title: String,
    x_axis_column: Option<String>,
    y_axis_columns: serde_json::Value,
    config: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

fn chart_type_str(t: ChartType) -> &'static str {
    match t {
        ChartType::Bar => "bar",
        ChartType::Line => "line",
        ChartType::Pie => "pie",
        ChartType::Scatter => "scatter",
        ChartType::Table => "table",
    }
}

fn parse_chart_type(s: &str) -> Result<ChartType> {
    match s {
        "bar" => Ok(ChartType::Bar),
        "line" => Ok(ChartType::Line),
        "pie" => Ok(ChartType::Pie),
        "scatter" => Ok(ChartType::Scatter),
        "table" => Ok(ChartType::Table),
        other => Err(NeoBaseError::internal(format!("unknown chart_type in storage: {other}"))),
    }
}

impl TryFrom<VisualizationRow> for Visualization {
    type Error = NeoBaseError;

    fn try_from(row: VisualizationRow) -> Result<Self> {
        let y_axis_columns: Vec<String> = serde_json::from_value(row.y_axis_columns)
            .map_err(|e| NeoBaseError::internal(format!("corrupt y_axis_columns JSON: {e}")))?;
        Ok(Visualization {
            id: row.id,
            query_id: row.query_id,
            chart_type: parse_chart_type(&row.chart_type)?,
            title: row.title,
            x_axis_column: row.x_axis_column,
            y_axis_columns,
            config: row.config,
            created_at: row.created_at,
        })
    }
}

impl<'a> VisualizationRepo<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, viz: &Visualization) -> Result<()> {
        sqlx::query(
            "INSERT INTO visualizations (id, query_id, chart_type, title, x_axis_column, \
             y_axis_columns, config, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(viz.id)
        .bind(viz.query_id)
        .bind(chart_type_str(viz.chart_type))
        .bind(&viz.title)
        .bind(&viz.x_axis_column)
        .bind(serde_json::to_value(&viz.y_axis_columns).map_err(|e| NeoBaseError::internal(e.to_string()))?)
        .bind(&viz.config)
        .bind(viz.created_at)
        .execute(self.pool)
        .await
        .map_err(NeoBaseError::from)?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Visualization> {
        let row: VisualizationRow = sqlx::query_as("SELECT * FROM visualizations WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(NeoBaseError::from)?
            .ok_or_else(|| NeoBaseError::not_found(format!("visualization {id} not found")))?;
        row.try_into()
    }

    pub async fn get_for_query(&self, query_id: Uuid) -> Result<Option<Visualization>> {
        let row: Option<VisualizationRow> =
            sqlx::query_as("SELECT * FROM visualizations WHERE query_id = $1")
                .bind(query_id)
                .fetch_optional(self.pool)
                .await
                .map_err(NeoBaseError::from)?;
        row.map(TryInto::try_into).transpose()
    }
}

#[cfg(test)]
mod tests {
    // Exercised against a live Postgres instance in tests/integration/.
}
