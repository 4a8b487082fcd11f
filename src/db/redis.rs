//! Redis driver (§4.A). Statements are raw Redis command lines (the LLM
//! emits the same syntax a user would type into `redis-cli`); `introspect_schema`
//! treats each key pattern prefix as a pseudo-table so the schema engine and
//! prompt formatter have something uniform to describe.

use std::time::Duration;

use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Value as RedisValue};

use crate::db::{map_timeout, ColumnInfo, Executor, QueryOutcome, Row, SshTunnel, Tx, Value};
use crate::error::{NeoBaseError, Result};
use crate::model::connection::ConnectionDescriptor;
use crate::model::query::StatementKind;
use crate::schema::{ColumnSchema, SchemaInfo, TableSchema};

const SCAN_SAMPLE_SIZE: usize = 200;
const EXAMPLE_ROW_LIMIT: u32 = 3;

pub struct RedisExecutor {
    manager: ConnectionManager,
    _tunnel: Option<SshTunnel>,
}

impl RedisExecutor {
    pub async fn connect(descriptor: &ConnectionDescriptor, tunnel: Option<SshTunnel>) -> Result<Self> {
        let (host, port) = match &tunnel {
            Some(t) => t.local_addr(),
            None => (descriptor.host.clone(), descriptor.port),
        };
        let scheme = if descriptor.ssl.use_ssl { "rediss" } else { "redis" };
        let auth = if descriptor.password.is_empty() {
            String::new()
        } else {
            format!("{}:{}@", descriptor.username, descriptor.password)
        };
        let db_index = descriptor.database.parse::<u32>().unwrap_or(0);
        let url = format!("{scheme}://{auth}{host}:{port}/{db_index}");

        let client = redis::Client::open(url).map_err(|e| NeoBaseError::driver_connect(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| NeoBaseError::driver_connect(e.to_string()))?;

        Ok(Self {
            manager,
            _tunnel: tunnel,
        })
    }
}

fn redis_to_value(v: &RedisValue) -> Value {
    match v {
        RedisValue::Nil => Value::Null,
        RedisValue::Int(i) => Value::Int(*i),
        RedisValue::Double(f) => Value::Float(*f),
        RedisValue::Boolean(b) => Value::Bool(*b),
        RedisValue::BulkString(bytes) => String::from_utf8(bytes.clone())
            .map(Value::String)
            .unwrap_or_else(|_| Value::Bytes(bytes.clone())),
        RedisValue::SimpleString(s) => Value::String(s.clone()),
        RedisValue::Okay => Value::String("OK".to_string()),
        RedisValue::Array(items) | RedisValue::Set(items) => {
            Value::Array(items.iter().map(redis_to_value).collect())
        }
        RedisValue::Map(pairs) => Value::Object(
            pairs
                .iter()
                .map(|(k, v)| (redis_to_value(k).to_display_string(), redis_to_value(v)))
                .collect(),
        ),
        _ => Value::Null,
    }
}

/// Splits a Redis command line the way `redis-cli` would, respecting single
/// and double quotes so values like `SET key "two words"` parse correctly.
fn tokenize(cmd: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes: Option<char> = None;
    for c in cmd.chars() {
        match in_quotes {
            Some(q) if c == q => in_quotes = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => in_quotes = Some(c),
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[async_trait::async_trait]
impl Executor for RedisExecutor {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
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
        _kind: StatementKind,
        find_count: bool,
        deadline: Duration,
    ) -> Result<QueryOutcome> {
        let tokens = tokenize(sql);
        if tokens.is_empty() {
            return Err(NeoBaseError::validation("empty redis command"));
        }

        let fut = async {
            let start = std::time::Instant::now();
            let mut conn = self.manager.clone();
            let mut command = redis::cmd(&tokens[0]);
            for arg in &tokens[1..] {
                command.arg(arg);
            }
            let reply: RedisValue = command
                .query_async(&mut conn)
                .await
                .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;

            let column = ColumnInfo::new("result", "redis_value");
            let rows = match &reply {
                RedisValue::Array(items) | RedisValue::Set(items) => {
                    items.iter().map(|v| vec![redis_to_value(v)]).collect()
                }
                RedisValue::Nil => Vec::new(),
                other => vec![vec![redis_to_value(other)]],
            };
            Ok(QueryOutcome::with_rows(vec![column], rows).with_elapsed(start.elapsed()))
        };

        let mut outcome = map_timeout(tokio::time::timeout(deadline, fut).await)?;
        if find_count {
            outcome.total_count = Some(outcome.row_count() as u64);
        }
        Ok(outcome)
    }

    async fn begin_tx(&self) -> Result<Box<dyn Tx>> {
        Ok(Box::new(NoopTx))
    }

    async fn introspect_schema(&self, selected_tables: Option<&[String]>) -> Result<SchemaInfo> {
        let mut conn = self.manager.clone();
        let keys: Vec<String> = conn
            .scan::<String>()
            .await
            .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?
            .take(SCAN_SAMPLE_SIZE)
            .collect()
            .await;

        let mut prefixes: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        for key in &keys {
            let prefix = key.split(':').next().unwrap_or(key).to_string();
            prefixes.insert(prefix);
        }

        let mut tables = std::collections::BTreeMap::new();
        for prefix in prefixes {
            if let Some(selected) = selected_tables {
                if !selected.contains(&prefix) {
                    continue;
                }
            }
            let columns = vec![
                (
                    "key".to_string(),
                    ColumnSchema {
                        data_type: "string".to_string(),
                        nullable: false,
                        default: None,
                        is_pk: true,
                        is_fk: false,
                        fk_table: None,
                        fk_column: None,
                    },
                ),
                (
                    "type".to_string(),
                    ColumnSchema {
                        data_type: "string".to_string(),
                        nullable: false,
                        default: None,
                        is_pk: false,
                        is_fk: false,
                        fk_table: None,
                        fk_column: None,
                    },
                ),
            ];
            let checksum = TableSchema::compute_checksum(&columns);
            tables.insert(
                prefix,
                TableSchema {
                    columns,
                    row_count: None,
                    size_bytes: None,
                    example_rows: None,
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
        let mut conn = self.manager.clone();
        let pattern = format!("{table}:*");
        let keys: Vec<String> = conn
            .scan_match::<_, String>(pattern)
            .await
            .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?
            .take(limit as usize)
            .collect()
            .await;

        let mut rows = Vec::new();
        for key in keys {
            let key_type: String = redis::cmd("TYPE")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            rows.push(vec![Value::String(key), Value::String(key_type)]);
        }
        Ok(rows)
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
