//! Connection manager / driver adapter integration tests.
//!
//! The "valid credentials" tests need a reachable Postgres instance; set
//! `DATABASE_URL` to run them. The "invalid host/port" tests need no live
//! database at all — they exercise the `driver.connect` failure path
//! (spec.md §8 scenario S1).

use neobase_core::db::{Executor, PostgresExecutor};
use neobase_core::model::connection::{ConnectionDescriptor, DbType, SslConfig};

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

fn invalid_host_descriptor() -> ConnectionDescriptor {
    ConnectionDescriptor {
        db_type: DbType::Postgres,
        host: "invalid.host.that.does.not.exist.local".to_string(),
        port: 5432,
        database: "testdb".to_string(),
        auth_database: None,
        username: "testuser".to_string(),
        password: "testpass".to_string(),
        ssl: SslConfig::default(),
        ssh: None,
        schema_name: None,
        google_sheet_id: None,
        google_access_token: None,
        google_refresh_token: None,
    }
}

#[tokio::test]
async fn test_connect_with_valid_credentials() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let descriptor = descriptor_from_url(&url);

    let executor = PostgresExecutor::connect(&descriptor, None)
        .await
        .expect("connect should succeed against a reachable database");
    executor.ping().await.expect("ping should succeed");
    executor.disconnect().await.unwrap();
}

#[tokio::test(flavor = "current_thread")]
async fn test_connect_with_invalid_host_returns_driver_connect_error() {
    let descriptor = invalid_host_descriptor();

    let result = PostgresExecutor::connect(&descriptor, None).await;
    assert!(result.is_err());

    let error = result.unwrap_err();
    assert_eq!(error.code(), "driver.connect");
}

#[tokio::test(flavor = "current_thread")]
async fn test_connect_with_invalid_port_returns_driver_connect_error() {
    let mut descriptor = invalid_host_descriptor();
    descriptor.host = "localhost".to_string();
    descriptor.port = 1; // nothing listens on port 1

    let result = PostgresExecutor::connect(&descriptor, None).await;
    assert!(result.is_err());
    assert_eq!(result.unwrap_err().code(), "driver.connect");
}

#[tokio::test]
async fn test_config_key_reused_across_identical_descriptors() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let a = descriptor_from_url(&url);
    let b = descriptor_from_url(&url);
    assert_eq!(a.config_key(), b.config_key());
}
