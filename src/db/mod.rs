//! Driver adapter layer (§4.A).
//!
//! Defines the uniform `Executor` contract every per-dialect driver
//! implements, plus the factory that dispatches on `DbType` to build one.
//! Each driver lives in its own module, mirroring the teacher's
//! one-file-per-backend layout (`postgres.rs` was the teacher's only
//! backend; the rest are new siblings built the same way).

mod clickhouse;
mod mongodb;
mod mysql;
mod neo4j;
mod postgres;
mod redis;
mod spreadsheet;
mod ssh;
mod types;

pub use postgres::PostgresExecutor;
pub use ssh::SshTunnel;
pub use types::{ColumnInfo, QueryOutcome, Row, Value};

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{NeoBaseError, Result};
use crate::model::connection::ConnectionDescriptor;
use crate::model::query::StatementKind;
use crate::schema::SchemaInfo;

/// Default end-to-end deadline for a single query execution (§5, unified
/// per the Open Question in SPEC_FULL.md §C.3).
pub const DEFAULT_QUERY_DEADLINE: Duration = Duration::from_secs(60);

/// Uniform capability set every per-dialect driver implements (§4.A,
/// §9 "Polymorphic drivers... dispatched by the descriptor's `type` tag").
/// The `ConnectionManager` holds these behind `Box<dyn Executor>`.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn ping(&self) -> Result<()>;

    /// Cheap liveness check the manager uses before handing the entry out
    /// (§4.B invariant iv).
    async fn is_alive(&self) -> bool;

    /// Runs one statement. `find_count` requests a `COUNT(*)`-equivalent
    /// alongside the rows, used by pagination (§4.D step 2).
    async fn execute_query(
        &self,
        sql: &str,
        kind: StatementKind,
        find_count: bool,
        deadline: Duration,
    ) -> Result<QueryOutcome>;

    /// Begins a transaction for drivers that support one. Dialects without
    /// transactional DDL (Mongo, Redis) execute statements directly and
    /// return a no-op handle.
    async fn begin_tx(&self) -> Result<Box<dyn Tx>>;

    async fn introspect_schema(&self, selected_tables: Option<&[String]>) -> Result<SchemaInfo>;

    async fn table_checksum(&self, table: &str) -> Result<String>;

    async fn sample_rows(&self, table: &str, limit: u32) -> Result<Vec<Row>>;

    async fn disconnect(&self) -> Result<()>;
}

/// A transaction handle returned by `Executor::begin_tx` (§4.A).
#[async_trait]
pub trait Tx: Send + Sync {
    async fn execute_query(&mut self, sql: &str, kind: StatementKind) -> Result<QueryOutcome>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Connects a fresh `Executor` for the given descriptor, dispatching on
/// `db_type`. The SSH pre-connect step (§4.A) is applied uniformly here so
/// individual drivers don't each reimplement tunnel dialing.
pub async fn connect(descriptor: &ConnectionDescriptor) -> Result<Box<dyn Executor>> {
    use crate::model::connection::DbType;

    let tunnel = match &descriptor.ssh {
        Some(ssh_cfg) if ssh_cfg.enabled => {
            Some(ssh::SshTunnel::open(ssh_cfg, &descriptor.host, descriptor.port).await?)
        }
        _ => None,
    };

    match descriptor.db_type {
        DbType::Postgres | DbType::Yugabyte => {
            Ok(Box::new(postgres::PostgresExecutor::connect(descriptor, tunnel).await?))
        }
        DbType::Mysql => Ok(Box::new(mysql::MysqlExecutor::connect(descriptor, tunnel).await?)),
        DbType::Clickhouse => {
            Ok(Box::new(clickhouse::ClickhouseExecutor::connect(descriptor, tunnel).await?))
        }
        DbType::Mongodb => Ok(Box::new(mongodb::MongoExecutor::connect(descriptor, tunnel).await?)),
        DbType::Redis => Ok(Box::new(redis::RedisExecutor::connect(descriptor, tunnel).await?)),
        DbType::Neo4j => Ok(Box::new(neo4j::Neo4jExecutor::connect(descriptor, tunnel).await?)),
        DbType::Spreadsheet | DbType::GoogleSheets => {
            Ok(Box::new(spreadsheet::SpreadsheetExecutor::connect(descriptor, tunnel).await?))
        }
    }
}

/// Thin dialect classification used by drivers to render `LIMIT/OFFSET`
/// equivalents and quoting for the schema engine and pagination rewriter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Mysql,
    Clickhouse,
    Mongodb,
    Redis,
    Neo4j,
}

impl Dialect {
    pub fn from_db_type(t: crate::model::connection::DbType) -> Self {
        use crate::model::connection::DbType;
        match t {
            DbType::Postgres | DbType::Yugabyte | DbType::Spreadsheet | DbType::GoogleSheets => {
                Self::Postgres
            }
            DbType::Mysql => Self::Mysql,
            DbType::Clickhouse => Self::Clickhouse,
            DbType::Mongodb => Self::Mongodb,
            DbType::Redis => Self::Redis,
            DbType::Neo4j => Self::Neo4j,
        }
    }

    /// Wraps a SELECT-like statement with this dialect's paging clause and
    /// returns `(paginated, count_query)` (§4.D step 2).
    pub fn paginate(&self, sql: &str, page: u32, page_size: u32) -> (String, String) {
        let sql_trimmed = sql.trim_end_matches(';').trim();
        let offset = (page.saturating_sub(1)) as u64 * page_size as u64;
        let count_query = format!("SELECT COUNT(*) AS total FROM ({sql_trimmed}) AS _neobase_count");
        let paginated = match self {
            Self::Mysql | Self::Postgres | Self::Clickhouse => {
                format!("{sql_trimmed} LIMIT {page_size} OFFSET {offset}")
            }
            Self::Mongodb | Self::Redis | Self::Neo4j => {
                format!("{sql_trimmed} SKIP {offset} LIMIT {page_size}")
            }
        };
        (paginated, count_query)
    }
}

pub(crate) fn map_timeout(
    res: std::result::Result<Result<QueryOutcome>, tokio::time::error::Elapsed>,
) -> Result<QueryOutcome> {
    match res {
        Ok(inner) => inner,
        Err(_) => Err(NeoBaseError::driver_timeout("query exceeded its deadline")),
    }
}
