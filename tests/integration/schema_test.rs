//! Schema Engine integration tests (component C).
//!
//! Requires a reachable Postgres instance; set `DATABASE_URL` to run.
//! Exercises checksum determinism (invariant 6, spec.md §8) and
//! `diffSchema` against a live, mutating schema rather than synthetic
//! `TableSchema` fixtures (those are covered by the engine's own unit
//! tests in `src/schema/mod.rs`).

use neobase_core::db::{Executor, PostgresExecutor};
use neobase_core::model::connection::{ConnectionDescriptor, DbType, SslConfig};
use neobase_core::model::query::StatementKind;
use neobase_core::schema::{diff_schema, SchemaEngine};

fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

fn descriptor_from_url(url: &str) -> ConnectionDescriptor {
    let parsed = url::Url::parse(url).expect("valid test DATABASE_URL");
    ConnectionDescriptor {
        db_type: DbType::Postgres,
        host: parsed.host_str().unwrap_or("localhost").to_string(),
        port: parsed.port().unwrap_or(5432),
        database: parsed.path().trim_start_matches('/').to_string(),
        auth_database: None,
        username: parsed.username().to_string(),
        password: parsed.password().unwrap_or("").to_string(),
        ssl: SslConfig::default(),
        ssh: None,
        schema_name: None,
        google_sheet_id: None,
        google_access_token: None,
        google_refresh_token: None,
    }
}

#[tokio::test]
async fn test_checksum_deterministic_across_runs() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let descriptor = descriptor_from_url(&url);
    let executor = PostgresExecutor::connect(&descriptor, None).await.unwrap();

    let table = format!("neobase_schema_test_{}", uuid::Uuid::new_v4().simple());
    executor
        .execute_query(
            &format!("CREATE TABLE {table} (id INTEGER PRIMARY KEY, label TEXT)"),
            StatementKind::Ddl,
            false,
            std::time::Duration::from_secs(5),
        )
        .await
        .unwrap();

    let engine = SchemaEngine::new();
    let chat_id = uuid::Uuid::new_v4();
    let first = engine
        .get_schema(chat_id, &executor, Some(&[table.clone()]))
        .await
        .unwrap();
    engine.invalidate(chat_id).await;
    let second = engine
        .get_schema(chat_id, &executor, Some(&[table.clone()]))
        .await
        .unwrap();

    assert_eq!(first.checksum, second.checksum);

    executor
        .execute_query(
            &format!("DROP TABLE {table}"),
            StatementKind::Ddl,
            false,
            std::time::Duration::from_secs(5),
        )
        .await
        .unwrap();
    executor.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_diff_detects_column_added_on_live_schema() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let descriptor = descriptor_from_url(&url);
    let executor = PostgresExecutor::connect(&descriptor, None).await.unwrap();

    let table = format!("neobase_schema_diff_{}", uuid::Uuid::new_v4().simple());
    executor
        .execute_query(
            &format!("CREATE TABLE {table} (id INTEGER PRIMARY KEY)"),
            StatementKind::Ddl,
            false,
            std::time::Duration::from_secs(5),
        )
        .await
        .unwrap();

    let engine = SchemaEngine::new();
    let chat_id = uuid::Uuid::new_v4();
    let before = engine
        .get_schema(chat_id, &executor, Some(&[table.clone()]))
        .await
        .unwrap();

    executor
        .execute_query(
            &format!("ALTER TABLE {table} ADD COLUMN note TEXT"),
            StatementKind::Ddl,
            false,
            std::time::Duration::from_secs(5),
        )
        .await
        .unwrap();
    engine.invalidate(chat_id).await;
    let after = engine
        .get_schema(chat_id, &executor, Some(&[table.clone()]))
        .await
        .unwrap();

    let diff = diff_schema(Some(&before), &after);
    assert!(!diff.is_first_time);
    assert!(diff.column_changes.iter().any(|c| c.contains("note added")));

    executor
        .execute_query(
            &format!("DROP TABLE {table}"),
            StatementKind::Ddl,
            false,
            std::time::Duration::from_secs(5),
        )
        .await
        .unwrap();
    executor.disconnect().await.unwrap();
}
