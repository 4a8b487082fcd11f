//! Chat-keyed connection pool (§4.B).
//!
//! One live `Executor` per chat, reused across requests by matching the
//! descriptor's `config_key()` (§4.B: "reuses an entry with an identical
//! config key"), reference-counted by active subscribers (in-flight request
//! handlers and open SSE streams), and swept by a background reaper once no
//! subscriber has held it for `connection_idle_ttl` (§4.B invariant iv, §9
//! "background reaper").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{self, Executor};
use crate::error::Result;
use crate::model::connection::ConnectionDescriptor;

/// One chat's live connection plus the bookkeeping the manager and reaper
/// need (§4.B).
pub struct ConnectionEntry {
    pub executor: Box<dyn Executor>,
    config_key: String,
    subscribers: AtomicU64,
    last_released: std::sync::Mutex<Instant>,
}

impl ConnectionEntry {
    fn idle_for(&self) -> Duration {
        if self.subscribers.load(Ordering::SeqCst) > 0 {
            return Duration::ZERO;
        }
        self.last_released.lock().expect("poisoned").elapsed()
    }
}

/// Multi-tenant connection pool keyed by chat id (§4.B).
#[derive(Default)]
pub struct ConnectionManager {
    entries: RwLock<HashMap<Uuid, Arc<ConnectionEntry>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the chat's live executor, connecting fresh if there is no
    /// entry yet, the entry's config key no longer matches `descriptor`
    /// (the connection was edited, bumping `connectionGeneration`), or the
    /// cached entry has gone dead (§4.B invariant iv).
    pub async fn acquire(&self, chat_id: Uuid, descriptor: &ConnectionDescriptor) -> Result<Arc<ConnectionEntry>> {
        let config_key = descriptor.config_key();

        if let Some(entry) = self.entries.read().await.get(&chat_id).cloned() {
            if entry.config_key == config_key && entry.executor.is_alive().await {
                entry.subscribers.fetch_add(1, Ordering::SeqCst);
                debug!(%chat_id, "connection manager: reusing entry");
                return Ok(entry);
            }
        }

        debug!(%chat_id, "connection manager: opening fresh executor");
        let executor = db::connect(descriptor).await?;
        let entry = Arc::new(ConnectionEntry {
            executor,
            config_key,
            subscribers: AtomicU64::new(1),
            last_released: std::sync::Mutex::new(Instant::now()),
        });

        let mut entries = self.entries.write().await;
        if let Some(stale) = entries.insert(chat_id, entry.clone()) {
            if let Err(e) = stale.executor.disconnect().await {
                warn!(%chat_id, error = %e, "failed to disconnect stale executor");
            }
        }
        Ok(entry)
    }

    /// Releases a subscriber's hold on a chat's entry. The entry stays
    /// cached (subject to the reaper) so the next request doesn't pay
    /// reconnect cost (§4.B: "single live executor per active chat").
    pub async fn release(&self, chat_id: Uuid) {
        if let Some(entry) = self.entries.read().await.get(&chat_id) {
            let remaining = entry.subscribers.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
            if remaining == 0 {
                *entry.last_released.lock().expect("poisoned") = Instant::now();
            }
        }
    }

    /// Forcibly drops and disconnects a chat's entry, used when a chat's
    /// connection is replaced or deleted.
    pub async fn invalidate(&self, chat_id: Uuid) {
        if let Some(entry) = self.entries.write().await.remove(&chat_id) {
            if let Err(e) = entry.executor.disconnect().await {
                warn!(%chat_id, error = %e, "failed to disconnect invalidated executor");
            }
        }
    }

    /// Sweeps entries with zero subscribers that have sat idle past `ttl`.
    /// Run on a fixed interval by `spawn_reaper` (§4.B "background reaper").
    pub async fn reap_idle(&self, ttl: Duration) {
        let stale: Vec<Uuid> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter(|(_, e)| e.idle_for() >= ttl)
                .map(|(id, _)| *id)
                .collect()
        };

        for chat_id in stale {
            let removed = self.entries.write().await.remove(&chat_id);
            if let Some(entry) = removed {
                debug!(%chat_id, "connection manager: reaping idle entry");
                if let Err(e) = entry.executor.disconnect().await {
                    warn!(%chat_id, error = %e, "failed to disconnect reaped executor");
                }
            }
        }
    }

    /// Closes every live entry, used during graceful shutdown (SPEC_FULL.md
    /// §B: "the Connection Manager closes every executor and SSH tunnel").
    pub async fn close_all(&self) {
        let mut entries = self.entries.write().await;
        for (chat_id, entry) in entries.drain() {
            if let Err(e) = entry.executor.disconnect().await {
                warn!(%chat_id, error = %e, "failed to disconnect executor during shutdown");
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Observation-only liveness check (§4.B `isConnected`) — doesn't touch
    /// `subscribers`, unlike `acquire`.
    pub async fn is_connected(&self, chat_id: Uuid) -> bool {
        match self.entries.read().await.get(&chat_id) {
            Some(entry) => entry.executor.is_alive().await,
            None => false,
        }
    }

    /// Observation-only snapshot of a chat's entry (§4.B `getConnectionInfo`).
    pub async fn connection_info(&self, chat_id: Uuid) -> Option<ConnectionInfo> {
        let entry = self.entries.read().await.get(&chat_id).cloned()?;
        Some(ConnectionInfo {
            connected: entry.executor.is_alive().await,
            subscribers: entry.subscribers.load(Ordering::SeqCst),
            idle_for_secs: entry.idle_for().as_secs(),
        })
    }
}

/// Observation-only snapshot returned by `getConnectionInfo` (§4.B).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionInfo {
    pub connected: bool,
    pub subscribers: u64,
    pub idle_for_secs: u64,
}

/// Spawns the background reaper task, returning its `JoinHandle` so the
/// caller can `abort()` it during graceful shutdown.
pub fn spawn_reaper(manager: Arc<ConnectionManager>, period: Duration, ttl: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            manager.reap_idle(ttl).await;
        }
    })
}

pub(crate) fn config_key_mismatch(descriptor: &ConnectionDescriptor, cached_key: &str) -> bool {
    descriptor.config_key() != cached_key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::connection::{DbType, SslConfig};

    fn sample_descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor {
            db_type: DbType::Postgres,
            host: "localhost".into(),
            port: 5432,
            database: "mydb".into(),
            auth_database: None,
            username: "user".into(),
            password: "secret".into(),
            ssl: SslConfig::default(),
            ssh: None,
            schema_name: None,
            google_sheet_id: None,
            google_access_token: None,
            google_refresh_token: None,
        }
    }

    #[test]
    fn test_config_key_mismatch_detects_password_change() {
        let original = sample_descriptor();
        let key = original.config_key();
        let mut changed = sample_descriptor();
        changed.password = "different".into();
        assert!(config_key_mismatch(&changed, &key));
        assert!(!config_key_mismatch(&original, &key));
    }

    #[tokio::test]
    async fn test_manager_starts_empty() {
        let manager = ConnectionManager::new();
        assert_eq!(manager.len().await, 0);
    }
}
