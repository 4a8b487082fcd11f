//! Schema versioning and migrations for the metadata/history store (§4.H).
//!
//! Forward-only, version-tracked migrations against the Postgres database
//! named by `AppConfig::metadata_db_url`, following the same
//! `schema_versions` bookkeeping the teacher used for its local SQLite
//! state database.

use sqlx::PgPool;
use tracing::info;

use crate::error::{NeoBaseError, Result};

const CURRENT_VERSION: i32 = 1;

/// Runs all pending migrations on the metadata store.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    ensure_schema_versions_table(pool).await?;

    let current = get_current_version(pool).await?;

    if current > CURRENT_VERSION {
        return Err(NeoBaseError::fatal(format!(
            "metadata database schema version ({current}) is newer than this binary supports ({CURRENT_VERSION})"
        )));
    }

    if current < CURRENT_VERSION {
        info!(from = current, to = CURRENT_VERSION, "migrating metadata store");
        run_pending_migrations(pool, current).await?;
    }

    Ok(())
}

async fn ensure_schema_versions_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_versions (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| NeoBaseError::fatal(format!("failed to create schema_versions table: {e}")))?;
    Ok(())
}

async fn get_current_version(pool: &PgPool) -> Result<i32> {
    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM schema_versions")
        .fetch_optional(pool)
        .await
        .map_err(|e| NeoBaseError::fatal(format!("failed to read schema version: {e}")))?;
    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

async fn run_pending_migrations(pool: &PgPool, from_version: i32) -> Result<()> {
    for version in (from_version + 1)..=CURRENT_VERSION {
        run_migration(pool, version).await?;
        record_version(pool, version).await?;
        info!(version, "applied metadata store migration");
    }
    Ok(())
}

async fn record_version(pool: &PgPool, version: i32) -> Result<()> {
    sqlx::query("INSERT INTO schema_versions (version) VALUES ($1)")
        .bind(version)
        .execute(pool)
        .await
        .map_err(|e| NeoBaseError::fatal(format!("failed to record migration: {e}")))?;
    Ok(())
}

async fn run_migration(pool: &PgPool, version: i32) -> Result<()> {
    match version {
        1 => migration_v1(pool).await,
        _ => Err(NeoBaseError::fatal(format!("unknown migration version: {version}"))),
    }
}

/// Migration v1: the full §3/§4.H entity set.
async fn migration_v1(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            credential_hash TEXT NOT NULL,
            federated_identity JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| NeoBaseError::fatal(format!("failed to create users table: {e}")))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chats (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            connection JSONB NOT NULL,
            selected_collections JSONB NOT NULL DEFAULT '"ALL"',
            settings JSONB NOT NULL,
            connection_generation INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| NeoBaseError::fatal(format!("failed to create chats table: {e}")))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chats_user ON chats(user_id)")
        .execute(pool)
        .await
        .map_err(|e| NeoBaseError::fatal(format!("failed to create chats index: {e}")))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id UUID PRIMARY KEY,
            chat_id UUID NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            user_id UUID NOT NULL,
            message_type TEXT NOT NULL CHECK (message_type IN ('user', 'assistant', 'system')),
            content TEXT NOT NULL,
            origin_message_id UUID,
            is_edited BOOLEAN NOT NULL DEFAULT false,
            is_pinned BOOLEAN NOT NULL DEFAULT false,
            pinned_at TIMESTAMPTZ,
            queries JSONB NOT NULL DEFAULT '[]',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| NeoBaseError::fatal(format!("failed to create messages table: {e}")))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, created_at)")
        .execute(pool)
        .await
        .map_err(|e| NeoBaseError::fatal(format!("failed to create messages index: {e}")))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS llm_context_messages (
            id BIGSERIAL PRIMARY KEY,
            chat_id UUID NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            role TEXT NOT NULL CHECK (role IN ('user', 'assistant', 'system')),
            content JSONB NOT NULL,
            non_tech_mode BOOLEAN NOT NULL DEFAULT false,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| NeoBaseError::fatal(format!("failed to create llm_context_messages table: {e}")))?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_llm_context_chat ON llm_context_messages(chat_id, created_at)",
    )
    .execute(pool)
    .await
    .map_err(|e| NeoBaseError::fatal(format!("failed to create llm_context index: {e}")))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS visualizations (
            id UUID PRIMARY KEY,
            query_id UUID NOT NULL,
            chart_type TEXT NOT NULL,
            title TEXT NOT NULL,
            x_axis_column TEXT,
            y_axis_columns JSONB NOT NULL DEFAULT '[]',
            config JSONB NOT NULL DEFAULT 'null',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| NeoBaseError::fatal(format!("failed to create visualizations table: {e}")))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_visualizations_query ON visualizations(query_id)")
        .execute(pool)
        .await
        .map_err(|e| NeoBaseError::fatal(format!("failed to create visualizations index: {e}")))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY,
            value JSONB NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| NeoBaseError::fatal(format!("failed to create cache_entries table: {e}")))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache_entries(expires_at)")
        .execute(pool)
        .await
        .map_err(|e| NeoBaseError::fatal(format!("failed to create cache index: {e}")))?;

    Ok(())
}
