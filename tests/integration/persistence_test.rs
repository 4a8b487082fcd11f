//! Metadata/history store integration tests (component H).
//!
//! Requires a reachable Postgres instance; set `DATABASE_URL` to run. Skips
//! itself with a stderr notice otherwise, since `sqlx`'s Postgres driver has
//! no in-memory backend to fall back to.

use std::sync::Arc;

use neobase_core::crypto::{CredCrypto, PlaintextCrypto};
use neobase_core::model::chat::Chat;
use neobase_core::model::connection::{ConnectionDescriptor, DbType, SslConfig};
use neobase_core::model::user::User;
use neobase_core::persistence::MetadataStore;

fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

async fn get_test_store() -> Option<MetadataStore> {
    let url = get_test_database_url()?;
    let crypto: Arc<dyn CredCrypto> = Arc::new(PlaintextCrypto);
    MetadataStore::connect(&url, crypto).await.ok()
}

fn sample_connection() -> ConnectionDescriptor {
    ConnectionDescriptor {
        db_type: DbType::Postgres,
        host: "localhost".into(),
        port: 5432,
        database: "appdb".into(),
        auth_database: None,
        username: "appuser".into(),
        password: "apppass".into(),
        ssl: SslConfig::default(),
        ssh: None,
        schema_name: None,
        google_sheet_id: None,
        google_access_token: None,
        google_refresh_token: None,
    }
}

#[tokio::test]
async fn test_user_create_and_get_roundtrip() {
    let Some(store) = get_test_store().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let user = User::new(
        format!("user_{}", uuid::Uuid::new_v4()),
        format!("{}@example.com", uuid::Uuid::new_v4()),
        "hashed-password",
    );
    store.users().create(&user).await.unwrap();

    let fetched = store.users().get(user.id).await.unwrap();
    assert_eq!(fetched.username, user.username);
    assert_eq!(fetched.email, user.email);
}

#[tokio::test]
async fn test_duplicate_username_is_conflict() {
    let Some(store) = get_test_store().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let username = format!("dup_{}", uuid::Uuid::new_v4());
    let a = User::new(&username, format!("{}@example.com", uuid::Uuid::new_v4()), "hash-a");
    let b = User::new(&username, format!("{}@example.com", uuid::Uuid::new_v4()), "hash-b");

    store.users().create(&a).await.unwrap();
    let result = store.users().create(&b).await;
    assert!(result.is_err());
    assert_eq!(result.unwrap_err().code(), "conflict");
}

#[tokio::test]
async fn test_chat_create_get_and_delete() {
    let Some(store) = get_test_store().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let user = User::new(
        format!("chatowner_{}", uuid::Uuid::new_v4()),
        format!("{}@example.com", uuid::Uuid::new_v4()),
        "hash",
    );
    store.users().create(&user).await.unwrap();

    let chat = Chat::new(user.id, "test chat", sample_connection());
    store.chats().create(&chat).await.unwrap();

    let fetched = store.chats().get(chat.id).await.unwrap();
    assert_eq!(fetched.user_id, user.id);
    assert_eq!(fetched.connection.host, "localhost");

    store.chats().delete(chat.id).await.unwrap();
    let result = store.chats().get(chat.id).await;
    assert!(result.is_err());
    assert_eq!(result.unwrap_err().code(), "notFound");
}

#[tokio::test]
async fn test_chat_count_for_user_respects_trial_cap() {
    let Some(store) = get_test_store().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let user = User::new(
        format!("capuser_{}", uuid::Uuid::new_v4()),
        format!("{}@example.com", uuid::Uuid::new_v4()),
        "hash",
    );
    store.users().create(&user).await.unwrap();

    assert_eq!(store.chats().count_for_user(user.id).await.unwrap(), 0);

    let chat = Chat::new(user.id, "first chat", sample_connection());
    store.chats().create(&chat).await.unwrap();

    assert_eq!(store.chats().count_for_user(user.id).await.unwrap(), 1);
}
