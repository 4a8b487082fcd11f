//! Per-query execution (§4.D steps 1-3 of the per-query loop).
//!
//! Isolates the "take one proposed `Query`, paginate it if it's a SELECT,
//! run it against the chat's executor, and persist the encrypted result"
//! step so the pipeline's `queries[]` loop (§4.D, §5 "sequential in
//! `queries[]` order") stays a thin driver over this.

use std::time::Instant;

use crate::crypto::CredCrypto;
use crate::db::{Dialect, Executor};
use crate::error::Result;
use crate::model::query::{Pagination, Query, QueryType, StatementKind};

/// Default page size used when a SELECT-like query carries no
/// caller-supplied pagination (§4.D step 2).
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Runs one query against a chat's live executor, applying pagination
/// synthesis and result encryption (§4.D, §4.J).
pub struct QueryRunner<'a> {
    executor: &'a dyn Executor,
    crypto: &'a dyn CredCrypto,
    dialect: Dialect,
}

impl<'a> QueryRunner<'a> {
    pub fn new(executor: &'a dyn Executor, crypto: &'a dyn CredCrypto, dialect: Dialect) -> Self {
        Self {
            executor,
            crypto,
            dialect,
        }
    }

    /// Executes `query` in place, mutating its execution bookkeeping
    /// (§4.D step 3: "persist `executionResult`... and `executionTime`;
    /// set `isExecuted=true`"). Returns `Err` on failure after recording the
    /// error on the query itself (§7: "keeps the assistant message intact").
    pub async fn run(&self, query: &mut Query, deadline: std::time::Duration) -> Result<()> {
        let is_select = query.statement_kind == StatementKind::Select;

        let sql = if is_select && query.pagination.is_none() {
            let (paginated, _count_query) =
                self.dialect.paginate(&query.statement, 1, DEFAULT_PAGE_SIZE);
            query.pagination = Some(Pagination::first_page(DEFAULT_PAGE_SIZE));
            paginated
        } else {
            query.statement.clone()
        };

        query.state = QueryType::Executing;
        let start = Instant::now();
        let outcome = self
            .executor
            .execute_query(&sql, query.statement_kind, is_select, deadline)
            .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                if let Some(pagination) = query.pagination.as_mut() {
                    pagination.total_rows = result.total_count;
                    pagination.has_more = result
                        .total_count
                        .map(|total| total > pagination.page_size as u64)
                        .unwrap_or(false);
                }
                let payload = serde_json::to_string(&result)
                    .map_err(|e| crate::error::NeoBaseError::internal(e.to_string()))?;
                let encrypted = self.crypto.encrypt(&payload)?;
                query.mark_executed(encrypted, elapsed_ms);
                Ok(())
            }
            Err(e) => {
                query.error = Some(e.to_string());
                query.state = QueryType::Failed;
                query.action_at = Some(chrono::Utc::now());
                Err(e)
            }
        }
    }

    /// Runs `query`'s `rollback_statement`, marking it rolled back on success
    /// (§4.D step 4: "enqueue its rollback and mark `isRolledBack`").
    pub async fn rollback(&self, query: &mut Query, deadline: std::time::Duration) -> Result<()> {
        let Some(rollback_sql) = query.rollback_statement.clone() else {
            return Err(crate::error::NeoBaseError::validation(
                "query has no rollback statement",
            ));
        };
        self.executor
            .execute_query(&rollback_sql, StatementKind::Dml, false, deadline)
            .await?;
        query.mark_rolled_back();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PlaintextCrypto;
    use crate::db::{ColumnInfo, QueryOutcome as DriverOutcome, Row, Tx, Value};
    use crate::model::connection::DbType;
    use crate::schema::SchemaInfo;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeExecutor {
        fail: AtomicBool,
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        async fn is_alive(&self) -> bool {
            true
        }
        async fn execute_query(
            &self,
            _sql: &str,
            _kind: StatementKind,
            find_count: bool,
            _deadline: std::time::Duration,
        ) -> Result<DriverOutcome> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(crate::error::NeoBaseError::driver_execute("boom"));
            }
            let rows: Vec<Row> = vec![vec![Value::Int(1)]];
            let mut outcome =
                DriverOutcome::with_rows(vec![ColumnInfo::new("id", "integer")], rows);
            if find_count {
                outcome.total_count = Some(1);
            }
            Ok(outcome)
        }
        async fn begin_tx(&self) -> Result<Box<dyn Tx>> {
            unimplemented!()
        }
        async fn introspect_schema(&self, _selected: Option<&[String]>) -> Result<SchemaInfo> {
            unimplemented!()
        }
        async fn table_checksum(&self, _table: &str) -> Result<String> {
            unimplemented!()
        }
        async fn sample_rows(&self, _table: &str, _limit: u32) -> Result<Vec<Row>> {
            unimplemented!()
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_run_marks_select_executed_with_pagination() {
        let executor = FakeExecutor {
            fail: AtomicBool::new(false),
        };
        let crypto = PlaintextCrypto;
        let runner = QueryRunner::new(
            &executor,
            &crypto,
            Dialect::from_db_type(DbType::Postgres),
        );
        let mut query = Query::new(uuid::Uuid::new_v4(), "SELECT * FROM users");

        runner
            .run(&mut query, std::time::Duration::from_secs(5))
            .await
            .unwrap();

        assert!(query.is_executed);
        assert!(query.execution_result.is_some());
        assert_eq!(query.pagination.as_ref().unwrap().total_rows, Some(1));
    }

    #[tokio::test]
    async fn test_run_records_error_on_failure() {
        let executor = FakeExecutor {
            fail: AtomicBool::new(true),
        };
        let crypto = PlaintextCrypto;
        let runner = QueryRunner::new(
            &executor,
            &crypto,
            Dialect::from_db_type(DbType::Postgres),
        );
        let mut query = Query::new(uuid::Uuid::new_v4(), "SELECT * FROM users");

        let result = runner.run(&mut query, std::time::Duration::from_secs(5)).await;

        assert!(result.is_err());
        assert!(!query.is_executed);
        assert_eq!(query.state, QueryType::Failed);
        assert!(query.error.is_some());
    }

    #[tokio::test]
    async fn test_rollback_requires_statement() {
        let executor = FakeExecutor {
            fail: AtomicBool::new(false),
        };
        let crypto = PlaintextCrypto;
        let runner = QueryRunner::new(
            &executor,
            &crypto,
            Dialect::from_db_type(DbType::Postgres),
        );
        let mut query = Query::new(uuid::Uuid::new_v4(), "DELETE FROM users");

        let result = runner
            .rollback(&mut query, std::time::Duration::from_secs(5))
            .await;
        assert!(result.is_err());
    }
}
