//! Metadata/history store (§4.H).
//!
//! Backs users, chats, messages, LLM context, visualizations, and the
//! ephemeral cache with Postgres (`AppConfig::metadata_db_url`), the same
//! way the teacher's `StateDb` backed its local state with SQLite — a
//! single pool, opened once at startup, handed out to per-entity repos.

mod cache;
mod chats;
mod llm_context;
mod messages;
mod migrations;
mod users;
mod visualizations;

pub use cache::CacheRepo;
pub use chats::ChatRepo;
pub use llm_context::LlmContextRepo;
pub use messages::MessageRepo;
pub use users::UserRepo;
pub use visualizations::VisualizationRepo;

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::crypto::CredCrypto;
use crate::error::{NeoBaseError, Result};

/// Owns the metadata database pool and hands out per-entity repos. Held
/// behind an `Arc` in `AppState` and cloned cheaply per request.
#[derive(Clone)]
pub struct MetadataStore {
    pool: PgPool,
    crypto: Arc<dyn CredCrypto>,
}

impl MetadataStore {
    /// Connects to the metadata database and runs pending migrations.
    pub async fn connect(database_url: &str, crypto: Arc<dyn CredCrypto>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| NeoBaseError::fatal(format!("failed to connect to metadata database: {e}")))?;

        migrations::run_migrations(&pool).await?;
        info!("metadata store connected and migrated");

        Ok(Self { pool, crypto })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn users(&self) -> UserRepo<'_> {
        UserRepo::new(&self.pool)
    }

    pub fn chats(&self) -> ChatRepo<'_> {
        ChatRepo::new(&self.pool, self.crypto.as_ref())
    }

    pub fn messages(&self) -> MessageRepo<'_> {
        MessageRepo::new(&self.pool)
    }

    pub fn llm_context(&self) -> LlmContextRepo<'_> {
        LlmContextRepo::new(&self.pool)
    }

    pub fn visualizations(&self) -> VisualizationRepo<'_> {
        VisualizationRepo::new(&self.pool)
    }

    pub fn cache(&self) -> CacheRepo<'_> {
        CacheRepo::new(&self.pool)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    // Repo behavior is exercised against a real Postgres instance under
    // `tests/integration/persistence.rs`; sqlx's Postgres driver has no
    // in-memory backend for unit tests here.
}
