//! Server-wide application state (§2 components A-J wired together).
//!
//! The teacher's `Orchestrator` held one database client, one LLM client,
//! and the TUI's conversation state, all behind `&mut self` since only one
//! terminal session ever used it. `AppState` is the HTTP-era equivalent: a
//! cheaply-`Clone`able bundle of `Arc`-wrapped collaborators handed to every
//! axum handler via `State<AppState>`, since many requests across many
//! chats touch it concurrently.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::config::AppConfig;
use crate::connection::{self, ConnectionManager};
use crate::crypto::{AesFieldCrypto, CredCrypto};
use crate::error::Result;
use crate::llm::LlmManager;
use crate::persistence::MetadataStore;
use crate::pipeline::{CancellationRegistry, MessagePipeline};
use crate::schema::SchemaEngine;
use crate::stream::StreamHub;

/// Every process-wide collaborator an HTTP handler might need, bundled so
/// axum's `State` extractor hands out one value instead of threading eight
/// separate `Arc`s through every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub metadata: MetadataStore,
    pub connections: Arc<ConnectionManager>,
    pub schema_engine: Arc<SchemaEngine>,
    pub streams: Arc<StreamHub>,
    pub cancellations: Arc<CancellationRegistry>,
    pub llm: Arc<LlmManager>,
    pub crypto: Arc<dyn CredCrypto>,
    pub pipeline: Arc<MessagePipeline>,
}

impl AppState {
    /// Connects to the metadata store, builds every collaborator, and
    /// starts the Connection Manager's background reaper (§4.B). Returns the
    /// reaper's handle alongside the state so the caller can abort it during
    /// graceful shutdown.
    pub async fn bootstrap(config: AppConfig) -> Result<(Self, JoinHandle<()>)> {
        let crypto: Arc<dyn CredCrypto> = Arc::new(AesFieldCrypto::from_passphrase(&config.aes_key_material));
        let metadata = MetadataStore::connect(&config.metadata_db_url, crypto.clone()).await?;

        let connections = Arc::new(ConnectionManager::new());
        let schema_engine = Arc::new(SchemaEngine::new());
        let streams = Arc::new(StreamHub::new());
        let cancellations = Arc::new(CancellationRegistry::new());
        let llm = Arc::new(LlmManager::new(
            std::env::var("LLM_PROVIDER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            None,
            None,
            None,
        )?);

        let pipeline = Arc::new(MessagePipeline::new(
            connections.clone(),
            schema_engine.clone(),
            llm.clone(),
            metadata.clone(),
            crypto.clone(),
            streams.clone(),
            cancellations.clone(),
        ));

        let reaper = connection::spawn_reaper(
            connections.clone(),
            config.connection_reap_period,
            config.connection_idle_ttl,
        );

        info!(port = config.http_port, environment = ?config.environment, "NeoBase server bootstrapped");

        Ok((
            Self {
                config: Arc::new(config),
                metadata,
                connections,
                schema_engine,
                streams,
                cancellations,
                llm,
                crypto,
                pipeline,
            },
            reaper,
        ))
    }

    /// Tears down every collaborator with held resources, in the order
    /// SPEC_FULL.md §B's graceful-shutdown note names them: reaper first (so
    /// it stops touching the connection map mid-drain), then live driver
    /// connections, then the metadata pool.
    pub async fn shutdown(&self, reaper: JoinHandle<()>) {
        reaper.abort();
        self.connections.close_all().await;
        self.metadata.close().await;
        info!("NeoBase server shut down cleanly");
    }
}

/// Grace period `axum::serve`'s `with_graceful_shutdown` future waits for
/// in-flight requests to drain before `AppState::shutdown` runs.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    // `AppState::bootstrap` opens a real Postgres pool; exercised against a
    // live database in tests/integration/.
}
