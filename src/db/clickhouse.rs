//! ClickHouse driver (§4.A). The `clickhouse` crate is built around
//! statically-typed row structs; since NeoBase needs to describe arbitrary,
//! LLM-chosen tables at runtime we go through its `fetch_bytes` escape hatch
//! and decode `JSONEachRow` ourselves into the dynamic `Value` tree.

use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Deserialize;

use crate::db::{map_timeout, ColumnInfo, Executor, QueryOutcome, Row, SshTunnel, Tx, Value};
use crate::error::{NeoBaseError, Result};
use crate::model::connection::ConnectionDescriptor;
use crate::model::query::StatementKind;
use crate::schema::{ColumnSchema, SchemaInfo, TableSchema};

const EXAMPLE_ROW_LIMIT: u32 = 3;

pub struct ClickhouseExecutor {
    client: clickhouse::Client,
    database: String,
    _tunnel: Option<SshTunnel>,
}

impl ClickhouseExecutor {
    pub async fn connect(descriptor: &ConnectionDescriptor, tunnel: Option<SshTunnel>) -> Result<Self> {
        let (host, port) = match &tunnel {
            Some(t) => t.local_addr(),
            None => (descriptor.host.clone(), descriptor.port),
        };
        let scheme = if descriptor.ssl.use_ssl { "https" } else { "http" };
        let url = format!("{scheme}://{host}:{port}");

        let client = clickhouse::Client::default()
            .with_url(url)
            .with_user(&descriptor.username)
            .with_password(&descriptor.password)
            .with_database(&descriptor.database);

        let executor = Self {
            client,
            database: descriptor.database.clone(),
            _tunnel: tunnel,
        };
        executor.ping().await?;
        Ok(executor)
    }

    async fn fetch_json_rows(&self, sql: &str) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
        let json_sql = format!("{} FORMAT JSONEachRow", sql.trim_end_matches(';').trim());
        let mut stream = self
            .client
            .query(&json_sql)
            .fetch_bytes("JSONEachRow")
            .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;

        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;
            buf.extend_from_slice(&chunk);
        }

        let mut rows = Vec::new();
        for line in buf.split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            let value: serde_json::Value = serde_json::from_slice(line)
                .map_err(|e| NeoBaseError::driver_execute(format!("invalid JSONEachRow line: {e}")))?;
            if let serde_json::Value::Object(map) = value {
                rows.push(map);
            }
        }
        Ok(rows)
    }
}

fn json_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(fields) => {
            Value::Object(fields.iter().map(|(k, v)| (k.clone(), json_to_value(v))).collect())
        }
    }
}

fn rows_to_outcome(rows: Vec<serde_json::Map<String, serde_json::Value>>) -> QueryOutcome {
    let columns: Vec<ColumnInfo> = rows
        .first()
        .map(|row| row.keys().map(|k| ColumnInfo::new(k.clone(), "unknown")).collect())
        .unwrap_or_default();
    let data: Vec<Row> = rows
        .into_iter()
        .map(|row| columns.iter().map(|c| json_to_value(row.get(&c.name).unwrap_or(&serde_json::Value::Null))).collect())
        .collect();
    QueryOutcome::with_rows(columns, data)
}

#[async_trait::async_trait]
impl Executor for ClickhouseExecutor {
    async fn ping(&self) -> Result<()> {
        self.client
            .query("SELECT 1")
            .execute()
            .await
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
        let start = Instant::now();
        let fut = async {
            match kind {
                StatementKind::Select => {
                    let rows = self.fetch_json_rows(sql).await?;
                    Ok(rows_to_outcome(rows).with_elapsed(start.elapsed()))
                }
                StatementKind::Dml | StatementKind::Ddl | StatementKind::Script => {
                    self.client
                        .query(sql)
                        .execute()
                        .await
                        .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;
                    Ok(QueryOutcome::with_rows_affected(0).with_elapsed(start.elapsed()))
                }
            }
        };
        let mut outcome = map_timeout(tokio::time::timeout(deadline, fut).await)?;

        if find_count && kind == StatementKind::Select {
            let count_sql = format!(
                "SELECT COUNT(*) AS total FROM ({}) AS _neobase_count",
                sql.trim_end_matches(';').trim()
            );
            if let Ok(rows) = self.fetch_json_rows(&count_sql).await {
                if let Some(row) = rows.first() {
                    if let Some(total) = row.get("total").and_then(|v| v.as_u64()) {
                        outcome.total_count = Some(total);
                    }
                }
            }
        }

        Ok(outcome)
    }

    async fn begin_tx(&self) -> Result<Box<dyn Tx>> {
        // ClickHouse has no general-purpose transactions; each statement is
        // its own unit of work, and rollback is handled by the pipeline's
        // synthesized inverse statement instead (§4.D).
        Ok(Box::new(NoopTx))
    }

    async fn introspect_schema(&self, selected_tables: Option<&[String]>) -> Result<SchemaInfo> {
        #[derive(Deserialize, clickhouse::Row)]
        struct ColumnRow {
            table: String,
            name: String,
            #[serde(rename = "type")]
            data_type: String,
            is_in_primary_key: u8,
        }

        let sql = format!(
            "SELECT table, name, type, is_in_primary_key FROM system.columns WHERE database = '{}' ORDER BY table, position",
            self.database.replace('\'', "''")
        );
        let rows: Vec<ColumnRow> = self
            .client
            .query(&sql)
            .fetch_all()
            .await
            .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;

        let mut by_table: std::collections::BTreeMap<String, Vec<(String, ColumnSchema)>> =
            std::collections::BTreeMap::new();
        for row in rows {
            if let Some(selected) = selected_tables {
                if !selected.contains(&row.table) {
                    continue;
                }
            }
            by_table.entry(row.table).or_default().push((
                row.name,
                ColumnSchema {
                    data_type: row.data_type.clone(),
                    nullable: row.data_type.starts_with("Nullable("),
                    default: None,
                    is_pk: row.is_in_primary_key != 0,
                    is_fk: false,
                    fk_table: None,
                    fk_column: None,
                },
            ));
        }

        let mut tables = std::collections::BTreeMap::new();
        for (table_name, columns) in by_table {
            let example_rows = self.sample_rows(&table_name, EXAMPLE_ROW_LIMIT).await.ok();
            let checksum = TableSchema::compute_checksum(&columns);
            tables.insert(
                table_name,
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
        let schema = self.introspect_schema(Some(std::slice::from_ref(&table.to_string()))).await?;
        Ok(schema
            .tables
            .get(table)
            .map(|t| t.checksum.clone())
            .unwrap_or_default())
    }

    async fn sample_rows(&self, table: &str, limit: u32) -> Result<Vec<Row>> {
        let sql = format!("SELECT * FROM {table} LIMIT {limit}");
        let rows = self.fetch_json_rows(&sql).await?;
        let outcome = rows_to_outcome(rows);
        Ok(outcome.rows)
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

struct NoopTx;

#[async_trait::async_trait]
impl Tx for NoopTx {
    async fn execute_query(&mut self, _sql: &str, _kind: StatementKind) -> Result<QueryOutcome> {
        Err(NeoBaseError::driver_execute(
            "transactions are not supported for this dialect",
        ))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
