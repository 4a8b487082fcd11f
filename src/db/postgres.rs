//! PostgreSQL / YugabyteDB driver (§4.A). Yugabyte speaks the Postgres wire
//! protocol and `information_schema`, so it shares this executor wholesale.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, Row as SqlxRow, TypeInfo};
use tracing::warn;

use crate::db::{map_timeout, ColumnInfo, Executor, QueryOutcome, Row, SshTunnel, Tx, Value};
use crate::error::{NeoBaseError, Result};
use crate::model::connection::ConnectionDescriptor;
use crate::model::query::StatementKind;
use crate::schema::{ColumnSchema, SchemaInfo, TableSchema};

const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 500;
const MAX_ROWS: usize = 1000;
const EXAMPLE_ROW_LIMIT: u32 = 3;

pub struct PostgresExecutor {
    pool: sqlx::PgPool,
    /// Kept alive for the pool's lifetime; the pool dials the tunnel's local
    /// endpoint rather than the real remote host.
    _tunnel: Option<SshTunnel>,
}

impl PostgresExecutor {
    pub async fn connect(descriptor: &ConnectionDescriptor, tunnel: Option<SshTunnel>) -> Result<Self> {
        let (host, port) = match &tunnel {
            Some(t) => t.local_addr(),
            None => (descriptor.host.clone(), descriptor.port),
        };

        let mut opts = sqlx::postgres::PgConnectOptions::new()
            .host(&host)
            .port(port)
            .username(&descriptor.username)
            .password(&descriptor.password)
            .database(&descriptor.database);

        if descriptor.ssl.use_ssl {
            opts = opts.ssl_mode(sqlx::postgres::PgSslMode::Require);
        }

        let mut last_err = None;
        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            match PgPoolOptions::new()
                .max_connections(5)
                .connect_with(opts.clone())
                .await
            {
                Ok(pool) => {
                    return Ok(Self {
                        pool,
                        _tunnel: tunnel,
                    })
                }
                Err(e) => {
                    warn!(attempt, error = %e, "postgres connect attempt failed");
                    last_err = Some(e);
                    if attempt < MAX_RETRY_ATTEMPTS {
                        let delay = RETRY_BASE_DELAY_MS * 2u64.pow(attempt - 1);
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        }

        Err(map_connection_error(last_err.expect("loop always sets last_err on failure")))
    }
}

#[async_trait::async_trait]
impl Executor for PostgresExecutor {
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
        let sql = sql.to_string();
        let fut = run_query(&pool, &sql, kind);
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
        Ok(Box::new(PostgresTx { tx: Some(tx) }))
    }

    async fn introspect_schema(&self, selected_tables: Option<&[String]>) -> Result<SchemaInfo> {
        let table_names = fetch_table_names(&self.pool).await?;
        let table_names: Vec<String> = match selected_tables {
            Some(selected) => table_names
                .into_iter()
                .filter(|t| selected.contains(t))
                .collect(),
            None => table_names,
        };

        let (columns_by_table, pks, fks) = tokio::try_join!(
            fetch_all_columns(&self.pool),
            fetch_all_primary_keys(&self.pool),
            fetch_foreign_keys(&self.pool),
        )?;

        let mut tables = std::collections::BTreeMap::new();
        for table_name in &table_names {
            let mut columns: Vec<(String, ColumnSchema)> = columns_by_table
                .get(table_name)
                .cloned()
                .unwrap_or_default();
            for (col_name, col) in columns.iter_mut() {
                let key = (table_name.clone(), col_name.clone());
                col.is_pk = pks.contains(&key);
                if let Some((fk_table, fk_col)) = fks.get(&key) {
                    col.is_fk = true;
                    col.fk_table = Some(fk_table.clone());
                    col.fk_column = Some(fk_col.clone());
                }
            }

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
        let columns = fetch_columns_for_table(&self.pool, table).await?;
        Ok(TableSchema::compute_checksum(&columns))
    }

    async fn sample_rows(&self, table: &str, limit: u32) -> Result<Vec<Row>> {
        let sql = format!("SELECT * FROM {} LIMIT {limit}", quote_ident(table));
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| NeoBaseError::driver_execute(format_query_error(&e)))?;
        Ok(rows.iter().map(convert_row).collect())
    }

    async fn disconnect(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

struct PostgresTx {
    tx: Option<sqlx::Transaction<'static, sqlx::Postgres>>,
}

#[async_trait::async_trait]
impl Tx for PostgresTx {
    async fn execute_query(&mut self, sql: &str, _kind: StatementKind) -> Result<QueryOutcome> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| NeoBaseError::internal("transaction already finished"))?;
        let start = Instant::now();
        let result = sqlx::query(sql)
            .execute(&mut **tx)
            .await
            .map_err(|e| NeoBaseError::driver_execute(format_query_error(&e)))?;
        Ok(QueryOutcome::with_rows_affected(result.rows_affected()).with_elapsed(start.elapsed()))
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| NeoBaseError::internal("transaction already finished"))?;
        tx.commit()
            .await
            .map_err(|e| NeoBaseError::driver_execute(e.to_string()))
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| NeoBaseError::internal("transaction already finished"))?;
        tx.rollback()
            .await
            .map_err(|e| NeoBaseError::driver_execute(e.to_string()))
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
                .map_err(|e| NeoBaseError::driver_execute(format_query_error(&e)))?;
            Ok(QueryOutcome::with_rows_affected(result.rows_affected()).with_elapsed(start.elapsed()))
        }
    }
}

async fn fetch_table_names(pool: &sqlx::PgPool) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
         ORDER BY table_name",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;
    Ok(rows.iter().map(|r| r.get::<String, _>(0)).collect())
}

async fn fetch_all_columns(
    pool: &sqlx::PgPool,
) -> Result<std::collections::HashMap<String, Vec<(String, ColumnSchema)>>> {
    let rows = sqlx::query(
        "SELECT table_name, column_name, data_type, is_nullable, column_default \
         FROM information_schema.columns \
         WHERE table_schema = 'public' \
         ORDER BY table_name, ordinal_position",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;

    let mut by_table: std::collections::HashMap<String, Vec<(String, ColumnSchema)>> =
        std::collections::HashMap::new();
    for row in rows {
        let table: String = row.get(0);
        let column: String = row.get(1);
        let data_type: String = row.get(2);
        let is_nullable: String = row.get(3);
        let default: Option<String> = row.get(4);
        by_table.entry(table).or_default().push((
            column,
            ColumnSchema {
                data_type,
                nullable: is_nullable == "YES",
                default,
                is_pk: false,
                is_fk: false,
                fk_table: None,
                fk_column: None,
            },
        ));
    }
    Ok(by_table)
}

async fn fetch_columns_for_table(
    pool: &sqlx::PgPool,
    table: &str,
) -> Result<Vec<(String, ColumnSchema)>> {
    let rows = sqlx::query(
        "SELECT column_name, data_type, is_nullable, column_default \
         FROM information_schema.columns \
         WHERE table_schema = 'public' AND table_name = $1 \
         ORDER BY ordinal_position",
    )
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
                    is_pk: false,
                    is_fk: false,
                    fk_table: None,
                    fk_column: None,
                },
            )
        })
        .collect())
}

async fn fetch_all_primary_keys(
    pool: &sqlx::PgPool,
) -> Result<std::collections::HashSet<(String, String)>> {
    let rows = sqlx::query(
        "SELECT tc.table_name, kcu.column_name \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
           ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
         WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = 'public'",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;

    Ok(rows
        .into_iter()
        .map(|row| (row.get::<String, _>(0), row.get::<String, _>(1)))
        .collect())
}

async fn fetch_foreign_keys(
    pool: &sqlx::PgPool,
) -> Result<std::collections::HashMap<(String, String), (String, String)>> {
    let rows = sqlx::query(
        "SELECT tc.table_name, kcu.column_name, ccu.table_name AS foreign_table, ccu.column_name AS foreign_column \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
           ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
         JOIN information_schema.constraint_column_usage ccu \
           ON tc.constraint_name = ccu.constraint_name AND tc.table_schema = ccu.table_schema \
         WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = 'public'",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let table: String = row.get(0);
            let column: String = row.get(1);
            let foreign_table: String = row.get(2);
            let foreign_column: String = row.get(3);
            ((table, column), (foreign_table, foreign_column))
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
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .into(),
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .into(),
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn is_transient_error(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed)
}

fn map_connection_error(e: sqlx::Error) -> NeoBaseError {
    let msg = e.to_string();
    if msg.contains("password authentication failed") || msg.contains("authentication") {
        NeoBaseError::driver_connect("authentication failed: check username and password")
    } else if msg.contains("does not exist") {
        NeoBaseError::driver_connect(format!("database does not exist: {msg}"))
    } else if msg.contains("Connection refused") {
        NeoBaseError::driver_connect("connection refused: check host and port")
    } else if is_transient_error(&e) {
        NeoBaseError::driver_connect(format!("transient connection failure: {msg}"))
    } else {
        NeoBaseError::driver_connect(msg)
    }
}

fn format_query_error(e: &sqlx::Error) -> String {
    if let sqlx::Error::Database(db_err) = e {
        if let Some(pg_err) = db_err.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
            let mut parts = vec![pg_err.message().to_string()];
            if let Some(detail) = pg_err.detail() {
                parts.push(format!("detail: {detail}"));
            }
            if let Some(hint) = pg_err.hint() {
                parts.push(format!("hint: {hint}"));
            }
            if let Some(table) = pg_err.table() {
                parts.push(format!("table: {table}"));
            }
            if let Some(column) = pg_err.column() {
                parts.push(format!("column: {column}"));
            }
            if let Some(constraint) = pg_err.constraint() {
                parts.push(format!("constraint: {constraint}"));
            }
            return parts.join("; ");
        }
    }
    e.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("normal"), "\"normal\"");
        assert_eq!(quote_ident("weird\"name"), "\"weird\"\"name\"");
    }
}
