//! Stream Hub / Cancellation Registry integration tests (components E, F),
//! exercising them wired through `MessagePipeline` rather than in
//! isolation (those are covered by `src/stream/mod.rs` and
//! `src/pipeline/cancellation.rs`'s own unit tests).
//!
//! Requires a reachable Postgres instance; set `DATABASE_URL` to run —
//! same rationale as `query_test.rs`: it backs the metadata store and the
//! chat's data connection, and the mock LLM never issues a real query
//! against it.

use std::sync::Arc;

use neobase_core::connection::ConnectionManager;
use neobase_core::crypto::{CredCrypto, PlaintextCrypto};
use neobase_core::llm::LlmManager;
use neobase_core::model::chat::Chat;
use neobase_core::model::connection::{ConnectionDescriptor, DbType, SslConfig};
use neobase_core::model::user::User;
use neobase_core::persistence::MetadataStore;
use neobase_core::pipeline::{CancellationRegistry, Event, MessagePipeline};
use neobase_core::schema::SchemaEngine;
use neobase_core::stream::StreamHub;

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

/// spec.md §8 invariant 7: cancellation terminates the stream with
/// exactly one of `cancelled|error|done`, with no further events after
/// it — regardless of whether the cancel request or the pipeline's own
/// completion wins the race, since the mock LLM responds too fast to
/// reliably force the `cancelled` branch.
#[tokio::test]
async fn test_stream_ends_with_exactly_one_terminal_event() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let crypto: Arc<dyn CredCrypto> = Arc::new(PlaintextCrypto);
    let metadata = MetadataStore::connect(&url, crypto.clone()).await.unwrap();

    let user = User::new(
        format!("stream_user_{}", uuid::Uuid::new_v4()),
        format!("{}@example.com", uuid::Uuid::new_v4()),
        "hash",
    );
    metadata.users().create(&user).await.unwrap();
    let mut chat = Chat::new(user.id, "stream test chat", descriptor_from_url(&url));
    chat.settings.auto_execute_query = false;
    metadata.chats().create(&chat).await.unwrap();

    let streams = Arc::new(StreamHub::new());
    let pipeline = Arc::new(MessagePipeline::new(
        Arc::new(ConnectionManager::new()),
        Arc::new(SchemaEngine::new()),
        Arc::new(LlmManager::mock()),
        metadata,
        crypto,
        streams.clone(),
        Arc::new(CancellationRegistry::new()),
    ));

    let stream_id = uuid::Uuid::new_v4();
    let mut rx = streams.open(chat.id, stream_id).await;

    let run_pipeline = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            let _ = pipeline.handle_user_message(&chat, "show me all users", stream_id).await;
        })
    };
    let race_cancel = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            pipeline.cancel(stream_id).await;
        })
    };

    let _ = tokio::join!(run_pipeline, race_cancel);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    let terminal_count = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminal_count, 1, "expected exactly one terminal event, got {events:?}");
    assert!(
        matches!(events.last(), Some(e) if e.is_terminal()),
        "terminal event must be last, got {events:?}"
    );
}

/// Cancelling an unknown `streamID` (already terminated, or never
/// registered) is a no-op rather than an error (§4.F).
#[tokio::test]
async fn test_cancel_unknown_stream_is_idempotent_noop() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let crypto: Arc<dyn CredCrypto> = Arc::new(PlaintextCrypto);
    let metadata = MetadataStore::connect(&url, crypto.clone()).await.unwrap();
    let pipeline = MessagePipeline::new(
        Arc::new(ConnectionManager::new()),
        Arc::new(SchemaEngine::new()),
        Arc::new(LlmManager::mock()),
        metadata,
        crypto,
        Arc::new(StreamHub::new()),
        Arc::new(CancellationRegistry::new()),
    );

    pipeline.cancel(uuid::Uuid::new_v4()).await;
    assert_eq!(pipeline.cancellations().len().await, 0);
}
