//! Query Pipeline integration tests (component D), exercising
//! `MessagePipeline` end to end against a real metadata store and a mock
//! LLM client (spec.md §8 S2 edit scenario, plus the happy-path
//! persistence contract from §4.D).
//!
//! Requires a reachable Postgres instance; set `DATABASE_URL` to run —
//! it backs both the metadata store and the chat's own data connection,
//! since the mock LLM never issues a real query against it in these
//! tests (`auto_execute_query` stays off, so no live-schema assumption is
//! needed).

use std::sync::Arc;

use neobase_core::connection::ConnectionManager;
use neobase_core::crypto::{CredCrypto, PlaintextCrypto};
use neobase_core::llm::LlmManager;
use neobase_core::model::chat::Chat;
use neobase_core::model::connection::{ConnectionDescriptor, DbType, SslConfig};
use neobase_core::model::message::MessageType;
use neobase_core::model::user::User;
use neobase_core::persistence::MetadataStore;
use neobase_core::pipeline::{CancellationRegistry, MessagePipeline};
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

struct Harness {
    pipeline: MessagePipeline,
    metadata: MetadataStore,
    chat: Chat,
}

async fn build_harness() -> Option<Harness> {
    let url = get_test_database_url()?;
    let crypto: Arc<dyn CredCrypto> = Arc::new(PlaintextCrypto);
    let metadata = MetadataStore::connect(&url, crypto.clone()).await.ok()?;

    let user = User::new(
        format!("pipeline_user_{}", uuid::Uuid::new_v4()),
        format!("{}@example.com", uuid::Uuid::new_v4()),
        "hash",
    );
    metadata.users().create(&user).await.unwrap();

    let mut chat = Chat::new(user.id, "pipeline test chat", descriptor_from_url(&url));
    chat.settings.auto_execute_query = false;
    metadata.chats().create(&chat).await.unwrap();

    let connections = Arc::new(ConnectionManager::new());
    let schema_engine = Arc::new(SchemaEngine::new());
    let streams = Arc::new(StreamHub::new());
    let cancellations = Arc::new(CancellationRegistry::new());
    let llm = Arc::new(LlmManager::mock());

    let pipeline = MessagePipeline::new(
        connections,
        schema_engine,
        llm,
        metadata.clone(),
        crypto,
        streams,
        cancellations,
    );

    Some(Harness {
        pipeline,
        metadata,
        chat,
    })
}

/// Happy path: a user message about "all users" is routed to the mock LLM,
/// which proposes `SELECT * FROM users`; with auto-execute off the query
/// stays unexecuted but both the user and assistant messages are
/// persisted, and the assistant message carries the proposed query.
#[tokio::test]
async fn test_handle_user_message_persists_proposed_query() {
    let Some(harness) = build_harness().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let stream_id = uuid::Uuid::new_v4();
    harness
        .pipeline
        .streams()
        .open(harness.chat.id, stream_id)
        .await;

    harness
        .pipeline
        .handle_user_message(&harness.chat, "show me all users", stream_id)
        .await
        .unwrap();

    let messages = harness.metadata.messages().list_for_chat(harness.chat.id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].message_type, MessageType::User);
    assert_eq!(messages[1].message_type, MessageType::Assistant);
    assert_eq!(messages[1].origin_message_id, Some(messages[0].id));
    assert_eq!(messages[1].queries.len(), 1);
    assert!(messages[1].queries[0].statement.contains("SELECT * FROM users"));
    assert!(!messages[1].queries[0].is_executed);
}

/// spec.md §8 S2: editing a not-yet-executed query flips `isEdited`,
/// replaces its statement, and keeps it unexecuted.
#[tokio::test]
async fn test_edit_query_before_execution() {
    let Some(harness) = build_harness().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let stream_id = uuid::Uuid::new_v4();
    harness
        .pipeline
        .streams()
        .open(harness.chat.id, stream_id)
        .await;
    harness
        .pipeline
        .handle_user_message(&harness.chat, "show me all users", stream_id)
        .await
        .unwrap();

    let messages = harness.metadata.messages().list_for_chat(harness.chat.id).await.unwrap();
    let assistant = &messages[1];
    let query_id = assistant.queries[0].id;

    harness
        .pipeline
        .edit_query(assistant.id, query_id, "SELECT 2")
        .await
        .unwrap();

    let reloaded = harness.metadata.messages().get(assistant.id).await.unwrap();
    let edited = &reloaded.queries[0];
    assert!(edited.is_edited);
    assert_eq!(edited.statement, "SELECT 2");
    assert!(!edited.is_executed);
}

/// Editing a user message resets its following assistant message's
/// already-executed queries back to unexecuted (§4.D edge case). Since
/// auto-execute is off in this harness, the query is marked executed
/// directly to isolate the cascade from the execution path itself.
#[tokio::test]
async fn test_edit_user_message_resets_following_assistant_queries() {
    let Some(harness) = build_harness().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let stream_id = uuid::Uuid::new_v4();
    harness
        .pipeline
        .streams()
        .open(harness.chat.id, stream_id)
        .await;
    harness
        .pipeline
        .handle_user_message(&harness.chat, "show me all users", stream_id)
        .await
        .unwrap();

    let messages = harness.metadata.messages().list_for_chat(harness.chat.id).await.unwrap();
    let user_message = &messages[0];
    let mut assistant = messages[1].clone();
    assistant.queries[0].is_executed = true;
    harness
        .metadata
        .messages()
        .save_queries(assistant.id, &assistant.queries)
        .await
        .unwrap();

    harness
        .pipeline
        .edit_user_message(user_message.id, "show me all users please")
        .await
        .unwrap();

    let reloaded_user = harness.metadata.messages().get(user_message.id).await.unwrap();
    assert!(reloaded_user.is_edited);
    assert_eq!(reloaded_user.content, "show me all users please");

    let reloaded_assistant = harness.metadata.messages().get(assistant.id).await.unwrap();
    assert!(!reloaded_assistant.queries[0].is_executed);
}
