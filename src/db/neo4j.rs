//! Neo4j driver (§4.A). Statements are raw Cypher text; dynamic columns are
//! recovered by deserializing each returned row into a generic key/value map
//! rather than a fixed struct, since the LLM picks arbitrary `RETURN` aliases.

use std::collections::HashMap;
use std::time::Duration;

use neo4rs::{query as cypher_query, BoltType, Graph};

use crate::db::{map_timeout, ColumnInfo, Executor, QueryOutcome, Row, SshTunnel, Tx, Value};
use crate::error::{NeoBaseError, Result};
use crate::model::connection::ConnectionDescriptor;
use crate::model::query::StatementKind;
use crate::schema::{ColumnSchema, SchemaInfo, TableSchema};

const EXAMPLE_ROW_LIMIT: u32 = 3;
const LABEL_SAMPLE_SIZE: i64 = 50;

pub struct Neo4jExecutor {
    graph: Graph,
    _tunnel: Option<SshTunnel>,
}

impl Neo4jExecutor {
    pub async fn connect(descriptor: &ConnectionDescriptor, tunnel: Option<SshTunnel>) -> Result<Self> {
        let (host, port) = match &tunnel {
            Some(t) => t.local_addr(),
            None => (descriptor.host.clone(), descriptor.port),
        };
        let uri = format!("bolt://{host}:{port}");

        let graph = Graph::new(&uri, &descriptor.username, &descriptor.password)
            .await
            .map_err(|e| NeoBaseError::driver_connect(e.to_string()))?;

        Ok(Self {
            graph,
            _tunnel: tunnel,
        })
    }

    async fn run_rows(&self, cypher: &str) -> Result<Vec<HashMap<String, BoltType>>> {
        let mut stream = self
            .graph
            .execute(cypher_query(cypher))
            .await
            .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;

        let mut rows = Vec::new();
        while let Ok(Some(row)) = stream.next().await {
            let map: HashMap<String, BoltType> = row
                .to()
                .map_err(|e| NeoBaseError::driver_execute(format!("row decode failed: {e}")))?;
            rows.push(map);
        }
        Ok(rows)
    }
}

fn bolt_to_value(b: &BoltType) -> Value {
    match b {
        BoltType::Null(_) => Value::Null,
        BoltType::Boolean(v) => Value::Bool(v.value),
        BoltType::Integer(v) => Value::Int(v.value),
        BoltType::Float(v) => Value::Float(v.value),
        BoltType::String(v) => Value::String(v.value.clone()),
        BoltType::List(items) => Value::Array(items.value.iter().map(bolt_to_value).collect()),
        BoltType::Map(map) => Value::Object(
            map.value
                .iter()
                .map(|(k, v)| (k.value.clone(), bolt_to_value(v)))
                .collect(),
        ),
        BoltType::Node(node) => Value::Object(
            node.properties
                .value
                .iter()
                .map(|(k, v)| (k.value.clone(), bolt_to_value(v)))
                .collect(),
        ),
        other => Value::String(format!("{other:?}")),
    }
}

fn rows_to_outcome(rows: Vec<HashMap<String, BoltType>>) -> QueryOutcome {
    let mut columns: Vec<String> = Vec::new();
    let mut seen = std::collections::BTreeSet::new();
    for row in &rows {
        for key in row.keys() {
            if seen.insert(key.clone()) {
                columns.push(key.clone());
            }
        }
    }
    let column_infos: Vec<ColumnInfo> = columns.iter().map(|c| ColumnInfo::new(c.clone(), "bolt")).collect();
    let data: Vec<Row> = rows
        .into_iter()
        .map(|mut row| {
            columns
                .iter()
                .map(|c| row.remove(c).map(|v| bolt_to_value(&v)).unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    QueryOutcome::with_rows(column_infos, data)
}

#[async_trait::async_trait]
impl Executor for Neo4jExecutor {
    async fn ping(&self) -> Result<()> {
        self.run_rows("RETURN 1").await.map(|_| ())
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
        let start = std::time::Instant::now();
        let fut = async {
            let rows = self.run_rows(sql).await?;
            Ok(rows_to_outcome(rows).with_elapsed(start.elapsed()))
        };
        let mut outcome = map_timeout(tokio::time::timeout(deadline, fut).await)?;
        if find_count {
            outcome.total_count = Some(outcome.row_count() as u64);
        }
        Ok(outcome)
    }

    async fn begin_tx(&self) -> Result<Box<dyn Tx>> {
        let tx = self
            .graph
            .start_txn()
            .await
            .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;
        Ok(Box::new(Neo4jTx { tx: Some(tx) }))
    }

    async fn introspect_schema(&self, selected_tables: Option<&[String]>) -> Result<SchemaInfo> {
        let labels = self.run_rows("CALL db.labels() YIELD label RETURN label").await?;
        let label_names: Vec<String> = labels
            .into_iter()
            .filter_map(|mut row| row.remove("label"))
            .filter_map(|v| if let BoltType::String(s) = v { Some(s.value) } else { None })
            .collect();

        let mut tables = std::collections::BTreeMap::new();
        for label in label_names {
            if let Some(selected) = selected_tables {
                if !selected.contains(&label) {
                    continue;
                }
            }
            let sample_query = format!("MATCH (n:`{label}`) RETURN n LIMIT {LABEL_SAMPLE_SIZE}");
            let rows = self.run_rows(&sample_query).await.unwrap_or_default();

            let mut columns: Vec<(String, ColumnSchema)> = Vec::new();
            let mut seen = std::collections::BTreeSet::new();
            for row in &rows {
                if let Some(BoltType::Node(node)) = row.get("n") {
                    for (k, v) in node.properties.value.iter() {
                        if seen.insert(k.value.clone()) {
                            columns.push((
                                k.value.clone(),
                                ColumnSchema {
                                    data_type: bolt_type_name(v).to_string(),
                                    nullable: true,
                                    default: None,
                                    is_pk: k.value == "id",
                                    is_fk: false,
                                    fk_table: None,
                                    fk_column: None,
                                },
                            ));
                        }
                    }
                }
            }

            let checksum = TableSchema::compute_checksum(&columns);
            tables.insert(
                label,
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
        let sample_query = format!("MATCH (n:`{table}`) RETURN n LIMIT {limit}");
        let rows = self.run_rows(&sample_query).await?;
        Ok(rows_to_outcome(rows).rows)
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

fn bolt_type_name(b: &BoltType) -> &'static str {
    match b {
        BoltType::Null(_) => "null",
        BoltType::Boolean(_) => "bool",
        BoltType::Integer(_) => "int",
        BoltType::Float(_) => "float",
        BoltType::String(_) => "string",
        BoltType::List(_) => "list",
        BoltType::Map(_) => "map",
        _ => "unknown",
    }
}

struct Neo4jTx {
    tx: Option<neo4rs::Txn>,
}

#[async_trait::async_trait]
impl Tx for Neo4jTx {
    async fn execute_query(&mut self, sql: &str, _kind: StatementKind) -> Result<QueryOutcome> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| NeoBaseError::internal("transaction already finished"))?;
        tx.run(cypher_query(sql))
            .await
            .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;
        Ok(QueryOutcome::new())
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
