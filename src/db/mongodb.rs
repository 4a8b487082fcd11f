//! MongoDB driver (§4.A). Because Mongo has no SQL dialect, the LLM emits a
//! JSON command document instead of text — `execute_query` parses the
//! statement as a `run_command` payload (`{"find": "...", "filter": {...}}`,
//! `{"aggregate": "...", "pipeline": [...]}`, etc.) the same way a developer
//! would from the `mongosh` JSON console.

use std::time::Duration;

use futures::TryStreamExt;
use mongodb::bson::{self, Document};
use mongodb::{options::ClientOptions, Client};

use crate::db::{map_timeout, ColumnInfo, Executor, QueryOutcome, Row, SshTunnel, Tx, Value};
use crate::error::{NeoBaseError, Result};
use crate::model::connection::ConnectionDescriptor;
use crate::model::query::StatementKind;
use crate::schema::{ColumnSchema, SchemaInfo, TableSchema};

const EXAMPLE_ROW_LIMIT: u32 = 3;
const SCHEMA_SAMPLE_SIZE: i64 = 50;

pub struct MongoExecutor {
    client: Client,
    database: String,
    _tunnel: Option<SshTunnel>,
}

impl MongoExecutor {
    pub async fn connect(descriptor: &ConnectionDescriptor, tunnel: Option<SshTunnel>) -> Result<Self> {
        let (host, port) = match &tunnel {
            Some(t) => t.local_addr(),
            None => (descriptor.host.clone(), descriptor.port),
        };

        let auth_db = descriptor.auth_database.as_deref().unwrap_or("admin");
        let uri = format!(
            "mongodb://{}:{}@{}:{}/{}?authSource={}",
            urlencode(&descriptor.username),
            urlencode(&descriptor.password),
            host,
            port,
            descriptor.database,
            auth_db,
        );

        let mut options = ClientOptions::parse(&uri)
            .await
            .map_err(|e| NeoBaseError::driver_connect(e.to_string()))?;
        options.app_name = Some("neobase".to_string());

        let client = Client::with_options(options).map_err(|e| NeoBaseError::driver_connect(e.to_string()))?;

        let executor = Self {
            client,
            database: descriptor.database.clone(),
            _tunnel: tunnel,
        };
        executor.ping().await?;
        Ok(executor)
    }

    fn db(&self) -> mongodb::Database {
        self.client.database(&self.database)
    }
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

fn bson_to_value(b: &bson::Bson) -> Value {
    match b {
        bson::Bson::Null => Value::Null,
        bson::Bson::Boolean(v) => Value::Bool(*v),
        bson::Bson::Int32(v) => Value::Int(*v as i64),
        bson::Bson::Int64(v) => Value::Int(*v),
        bson::Bson::Double(v) => Value::Float(*v),
        bson::Bson::String(v) => Value::String(v.clone()),
        bson::Bson::Binary(v) => Value::Bytes(v.bytes.clone()),
        bson::Bson::ObjectId(v) => Value::String(v.to_hex()),
        bson::Bson::DateTime(v) => Value::String(v.try_to_rfc3339_string().unwrap_or_default()),
        bson::Bson::Array(items) => Value::Array(items.iter().map(bson_to_value).collect()),
        bson::Bson::Document(doc) => Value::Object(
            doc.iter()
                .map(|(k, v)| (k.clone(), bson_to_value(v)))
                .collect(),
        ),
        other => Value::String(other.to_string()),
    }
}

fn doc_to_row(doc: &Document, columns: &[ColumnInfo]) -> Row {
    columns
        .iter()
        .map(|c| doc.get(&c.name).map(bson_to_value).unwrap_or(Value::Null))
        .collect()
}

fn columns_from_docs(docs: &[Document]) -> Vec<ColumnInfo> {
    let mut seen = std::collections::BTreeSet::new();
    for doc in docs {
        for key in doc.keys() {
            seen.insert(key.clone());
        }
    }
    seen.into_iter().map(|k| ColumnInfo::new(k, "bson")).collect()
}

#[async_trait::async_trait]
impl Executor for MongoExecutor {
    async fn ping(&self) -> Result<()> {
        self.db()
            .run_command(bson::doc! { "ping": 1 })
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
        let command: Document = serde_json::from_str::<serde_json::Value>(sql)
            .map_err(|e| NeoBaseError::validation(format!("invalid mongo command JSON: {e}")))
            .and_then(|v| bson::to_document(&v).map_err(|e| NeoBaseError::validation(e.to_string())))?;

        let fut = async {
            let start = std::time::Instant::now();
            let reply = self
                .db()
                .run_command(command.clone())
                .await
                .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;

            let docs = extract_documents(&reply);
            let columns = columns_from_docs(&docs);
            let rows = docs.iter().map(|d| doc_to_row(d, &columns)).collect();
            Ok(QueryOutcome::with_rows(columns, rows).with_elapsed(start.elapsed()))
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
        let names = self
            .db()
            .list_collection_names()
            .await
            .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;
        let names: Vec<String> = match selected_tables {
            Some(selected) => names.into_iter().filter(|n| selected.contains(n)).collect(),
            None => names,
        };

        let mut tables = std::collections::BTreeMap::new();
        for name in names {
            let collection = self.db().collection::<Document>(&name);
            let mut cursor = collection
                .find(bson::doc! {})
                .limit(SCHEMA_SAMPLE_SIZE)
                .await
                .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;
            let mut docs = Vec::new();
            while let Some(doc) = cursor
                .try_next()
                .await
                .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?
            {
                docs.push(doc);
            }

            let mut columns: Vec<(String, ColumnSchema)> = Vec::new();
            let mut seen = std::collections::BTreeSet::new();
            for doc in &docs {
                for (key, value) in doc.iter() {
                    if seen.insert(key.clone()) {
                        columns.push((
                            key.clone(),
                            ColumnSchema {
                                data_type: bson_type_name(value).to_string(),
                                nullable: true,
                                default: None,
                                is_pk: key == "_id",
                                is_fk: false,
                                fk_table: None,
                                fk_column: None,
                            },
                        ));
                    }
                }
            }

            let example_rows = Some(
                docs.iter()
                    .take(EXAMPLE_ROW_LIMIT as usize)
                    .map(|d| doc_to_row(d, &columns.iter().map(|(n, _)| ColumnInfo::new(n.clone(), "bson")).collect::<Vec<_>>()))
                    .collect(),
            );
            let checksum = TableSchema::compute_checksum(&columns);
            tables.insert(
                name,
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
        let collection = self.db().collection::<Document>(table);
        let mut cursor = collection
            .find(bson::doc! {})
            .limit(limit as i64)
            .await
            .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?;
        let mut docs = Vec::new();
        while let Some(doc) = cursor
            .try_next()
            .await
            .map_err(|e| NeoBaseError::driver_execute(e.to_string()))?
        {
            docs.push(doc);
        }
        let columns = columns_from_docs(&docs);
        Ok(docs.iter().map(|d| doc_to_row(d, &columns)).collect())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

fn bson_type_name(b: &bson::Bson) -> &'static str {
    match b {
        bson::Bson::Null => "null",
        bson::Bson::Boolean(_) => "bool",
        bson::Bson::Int32(_) | bson::Bson::Int64(_) => "int",
        bson::Bson::Double(_) => "double",
        bson::Bson::String(_) => "string",
        bson::Bson::Binary(_) => "binary",
        bson::Bson::ObjectId(_) => "objectId",
        bson::Bson::DateTime(_) => "date",
        bson::Bson::Array(_) => "array",
        bson::Bson::Document(_) => "object",
        _ => "unknown",
    }
}

fn extract_documents(reply: &Document) -> Vec<Document> {
    if let Ok(cursor) = reply.get_document("cursor") {
        if let Ok(batch) = cursor.get_array("firstBatch") {
            return batch
                .iter()
                .filter_map(|b| b.as_document().cloned())
                .collect();
        }
    }
    vec![reply.clone()]
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
