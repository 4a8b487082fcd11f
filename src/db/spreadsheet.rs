//! Spreadsheet / Google Sheets driver (§4.A, §4.G).
//!
//! Spreadsheet-backed chats don't get a bespoke storage engine — ingested
//! grids land as ordinary tables in the backing Postgres store, isolated per
//! chat under the `conn_<chatID>` schema namespace (§4.A, §6). This executor
//! is a thin Postgres executor pinned to that namespace via `search_path`;
//! everything else (introspection, checksumming, sampling) reuses the same
//! `information_schema` queries `postgres.rs` uses, scoped to one schema
//! instead of `public`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, Executor as _, Row as SqlxRow, TypeInfo};
use tracing::warn;

use crate::db::{map_timeout, ColumnInfo, Executor, QueryOutcome, Row, SshTunnel, Tx, Value};
use crate::error::{NeoBaseError, Result};
use crate::model::connection::ConnectionDescriptor;
use crate::model::query::StatementKind;
use crate::schema::{ColumnSchema, SchemaInfo, TableSchema};

const MAX_ROWS: usize = 1000;
const EXAMPLE_ROW_LIMIT: u32 = 3;

pub struct SpreadsheetExecutor {
    pool: sqlx::PgPool,
    schema: String,
    _tunnel: Option<SshTunnel>,
}

impl SpreadsheetExecutor {
    pub async fn connect(descriptor: &ConnectionDescriptor, tunnel: Option<SshTunnel>) -> Result<Self> {
        let (host, port) = match &tunnel {
            Some(t) => t.local_addr(),
            None => (descriptor.host.clone(), descriptor.port),
        };

        let schema = descriptor
            .schema_name
            .clone()
            .unwrap_or_else(|| ConnectionDescriptor::sheet_namespace("default"));
        let search_path = Arc::new(schema.clone());

        let opts = sqlx::postgres::PgConnectOptions::new()
            .host(&host)
            .port(port)
            .username(&descriptor.username)
            .password(&descriptor.password)
            .database(&descriptor.database);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .after_connect(move |conn, _meta| {
                let search_path = search_path.clone();
                Box::pin(async move {
                    conn.execute(
                        format!(
                            "CREATE SCHEMA IF NOT EXISTS \"{}\"",
                            search_path.replace('"', "\"\"")
                        )
                        .as_str(),
                    )
                    .await?;
                    conn.execute(
                        format!("SET search_path TO \"{}\", public", search_path.replace('"', "\"\""))
                            .as_str(),
                    )
                    .await?;
                    Ok(())
                })
            })
            .connect_with(opts)
            .await
            .map_err(|e| {
                warn!(error = %e, "spreadsheet backing-store connect failed");
                NeoBaseError::driver_connect(e.to_string())
            })?;

        Ok(Self {
            pool,
            schema,
            _tunnel: tunnel,
        })
    }
}

#[async_trait::async_trait]
impl Executor for SpreadsheetExecutor {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| NeoBaseError::driver_connect(e.to_string()))
    }

    async fn is_alive(&self) -> bool {
        self.ping().await.is_ok()
    }

    async fn execute_query(
        &self,
        sql: &str,
        kind: StatementKind,
        find_count: bool,
        deadline: Duration,
    ) -> Result<QueryOutcome> {
        let pool = self.pool.clone();
        let sql_owned = sql.to_string();
        let fut = run_query(&pool, &sql_owned, kind);
        let outcome = map_timeout(tokio::time::timeout(deadline, fut).await)?;

        if find_count && kind == StatementKind::Select {
            let count_sql = format!(
                "SELECT COUNT(*) AS total FROM ({}) AS _neobase_count",
                sql.trim_end_matches(';').trim()
            );
            if let Ok(row) = sqlx::query(&count_sql).fetch_one(&self.pool).await {
                let total: i64 = row.try_get(0).unwrap_or(0);
                let mut outcome = outcome;
                outcome.total_count = Some(total as u64);
                return Ok(outcome);
            }
        }

        Ok(outcome)
    }

    async fn begin_tx(&self) -> Result<Box<dyn Tx>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;
        Ok(Box::new(SpreadsheetTx { tx: Some(tx) }))
    }

    async fn introspect_schema(&self, selected_tables: Option<&[String]>) -> Result<SchemaInfo> {
        let table_names = fetch_table_names(&self.pool, &self.schema).await?;
        let table_names: Vec<String> = match selected_tables {
            Some(selected) => table_names.into_iter().filter(|t| selected.contains(t)).collect(),
            None => table_names,
        };

        let mut tables = std::collections::BTreeMap::new();
        for table_name in &table_names {
            let columns = fetch_columns_for_table(&self.pool, &self.schema, table_name).await?;
            let example_rows = self.sample_rows(table_name, EXAMPLE_ROW_LIMIT).await.ok();
            let checksum = TableSchema::compute_checksum(&columns);
            tables.insert(
                table_name.clone(),
                TableSchema {
                    columns,
                    row_count: None,
                    size_bytes: None,
                    example_rows,
                    checksum,
                },
            );
        }

        Ok(SchemaInfo::finalize(tables))
    }

    async fn table_checksum(&self, table: &str) -> Result<String> {
        let columns = fetch_columns_for_table(&self.pool, &self.schema, table).await?;
        Ok(TableSchema::compute_checksum(&columns))
    }

    async fn sample_rows(&self, table: &str, limit: u32) -> Result<Vec<Row>> {
        let sql = format!("SELECT * FROM {} LIMIT {limit}", quote_ident(table));
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;
        Ok(rows.iter().map(convert_row).collect())
    }

    async fn disconnect(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

struct SpreadsheetTx {
    tx: Option<sqlx::Transaction<'static, sqlx::Postgres>>,
}

#[async_trait::async_trait]
impl Tx for SpreadsheetTx {
    async fn execute_query(&mut self, sql: &str, _kind: StatementKind) -> Result<QueryOutcome> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| NeoBaseError::internal("transaction already finished"))?;
        let start = Instant::now();
        let result = sqlx::query(sql)
            .execute(&mut **tx)
            .await
            .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;
        Ok(QueryOutcome::with_rows_affected(result.rows_affected()).with_elapsed(start.elapsed()))
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| NeoBaseError::internal("transaction already finished"))?;
        tx.commit().await.map_err(|e| NeoBaseError::driver_execute(e.to_string()))
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| NeoBaseError::internal("transaction already finished"))?;
        tx.rollback().await.map_err(|e| NeoBaseError::driver_execute(e.to_string()))
    }
}

async fn run_query(pool: &sqlx::PgPool, sql: &str, kind: StatementKind) -> Result<QueryOutcome> {
    let start = Instant::now();
    match kind {
        StatementKind::Select => {
            use futures::TryStreamExt;
            let mut stream = sqlx::query(sql).fetch(pool);
            let mut rows = Vec::new();
            let mut columns: Vec<ColumnInfo> = Vec::new();
            while let Some(row) = stream
                .try_next()
                .await
                .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?
            {
                if columns.is_empty() {
                    columns = row
                        .columns()
                        .iter()
                        .map(|c| ColumnInfo::new(c.name(), c.type_info().name()))
                        .collect();
                }
                rows.push(convert_row(&row));
                if rows.len() >= MAX_ROWS {
                    break;
                }
            }
            Ok(QueryOutcome::with_rows(columns, rows).with_elapsed(start.elapsed()))
        }
        StatementKind::Dml | StatementKind::Ddl | StatementKind::Script => {
            let result = sqlx::query(sql)
                .execute(pool)
                .await
                .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;
            Ok(QueryOutcome::with_rows_affected(result.rows_affected()).with_elapsed(start.elapsed()))
        }
    }
}

async fn fetch_table_names(pool: &sqlx::PgPool, schema: &str) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = $1 AND table_type = 'BASE TABLE' \
         ORDER BY table_name",
    )
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;
    Ok(rows.iter().map(|r| r.get::<String, _>(0)).collect())
}

async fn fetch_columns_for_table(
    pool: &sqlx::PgPool,
    schema: &str,
    table: &str,
) -> Result<Vec<(String, ColumnSchema)>> {
    let rows = sqlx::query(
        "SELECT column_name, data_type, is_nullable, column_default \
         FROM information_schema.columns \
         WHERE table_schema = $1 AND table_name = $2 \
         ORDER BY ordinal_position",
    )
    .bind(schema)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let column: String = row.get(0);
            let data_type: String = row.get(1);
            let is_nullable: String = row.get(2);
            let default: Option<String> = row.get(3);
            (
                column,
                ColumnSchema {
                    data_type,
                    nullable: is_nullable == "YES",
                    default,
                    is_pk: column == "_row_id",
                    is_fk: false,
                    fk_table: None,
                    fk_column: None,
                },
            )
        })
        .collect())
}

fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| convert_value(row, i, col.type_info().name()))
        .collect()
}

fn convert_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index).ok().flatten().into(),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),
        "INT8" => row.try_get::<Option<i64>, _>(index).ok().flatten().into(),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),
        "FLOAT8" | "NUMERIC" => row.try_get::<Option<f64>, _>(index).ok().flatten().into(),
        "TIMESTAMP" | "TIMESTAMPTZ" | "DATE" => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .into(),
        "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(index).ok().flatten().into(),
        _ => row.try_get::<Option<String>, _>(index).ok().flatten().into(),
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
