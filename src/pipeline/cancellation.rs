//! Cancellation Registry (§4.F).
//!
//! Maps `streamID → cancelHandle`. `cancel()` is idempotent and the
//! registry is swept of handles at terminal states, mirroring the
//! teacher's `RequestQueue::cancel_current`/`cancel_by_id` bookkeeping but
//! keyed by stream rather than by in-process request id, since a NeoBase
//! stream can outlive any single HTTP handler.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Registers one `CancellationToken` per in-flight `streamID` (§4.F).
#[derive(Default)]
pub struct CancellationRegistry {
    tokens: RwLock<HashMap<Uuid, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh token for `stream_id`, replacing any stale one
    /// left over from a prior run under the same id.
    pub async fn register(&self, stream_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.write().await.insert(stream_id, token.clone());
        token
    }

    /// Cancels `stream_id`'s in-flight operation. Idempotent: cancelling an
    /// unknown or already-cancelled id is a no-op (§4.F).
    pub async fn cancel(&self, stream_id: Uuid) {
        if let Some(token) = self.tokens.read().await.get(&stream_id) {
            token.cancel();
        }
    }

    /// Removes `stream_id`'s handle once the pipeline reaches a terminal
    /// state (§4.F: "swept of handles at terminal states").
    pub async fn sweep(&self, stream_id: Uuid) {
        self.tokens.write().await.remove(&stream_id);
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }
}
