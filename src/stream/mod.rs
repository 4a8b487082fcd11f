//! Stream Hub (§4.E).
//!
//! A process-local registry mapping `streamID → channel<Event>`. The HTTP
//! SSE handler owns the receive end; the pipeline owns (and eventually
//! drops) the send end. Multiple subscribers per `(user, chat)` are
//! allowed, so the hub also tracks which stream ids belong to a chat, to
//! broadcast connection-level events (schema change, liveness error) to
//! every stream watching that chat (§4.E).

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::pipeline::events::Event;

/// Bounded channel depth per stream (§5: "Stream Hub channels are bounded
/// at depth 64; a slow consumer coalesces/backpressures rather than
/// growing unbounded").
pub const CHANNEL_DEPTH: usize = 64;

/// Registers active event streams and routes chat-wide broadcasts to all
/// of a chat's open streams (§4.E).
#[derive(Default)]
pub struct StreamHub {
    senders: RwLock<HashMap<Uuid, mpsc::Sender<Event>>>,
    chat_streams: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a fresh channel for `stream_id`, scoped to `chat_id` for
    /// broadcast purposes. Returns the receive end for the SSE handler.
    pub async fn open(&self, chat_id: Uuid, stream_id: Uuid) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        self.senders.write().await.insert(stream_id, tx);
        self.chat_streams
            .write()
            .await
            .entry(chat_id)
            .or_default()
            .insert(stream_id);
        rx
    }

    /// Sends one event to a single stream. Back-pressures the caller via
    /// the bounded channel rather than buffering unboundedly (§5); a full
    /// channel indicates a stalled consumer and the send is dropped with a
    /// warning rather than blocking the pipeline indefinitely.
    pub async fn publish(&self, stream_id: Uuid, event: Event) {
        let is_terminal = event.is_terminal();
        let sender = self.senders.read().await.get(&stream_id).cloned();
        if let Some(sender) = sender {
            if sender.try_send(event).is_err() {
                tracing::warn!(%stream_id, "stream hub: channel full or closed, dropping event");
            }
        }
        if is_terminal {
            self.close(stream_id).await;
        }
    }

    /// Broadcasts a connection-level event to every stream subscribed to
    /// `chat_id` (§4.E: "events are broadcast to all active streams for
    /// that chat when they describe connection-level phenomena").
    pub async fn broadcast_to_chat(&self, chat_id: Uuid, event: Event) {
        let stream_ids: Vec<Uuid> = self
            .chat_streams
            .read()
            .await
            .get(&chat_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        let senders = self.senders.read().await;
        for stream_id in stream_ids {
            if let Some(sender) = senders.get(&stream_id) {
                if sender.try_send(event.clone()).is_err() {
                    tracing::warn!(%stream_id, %chat_id, "stream hub: broadcast dropped, channel full");
                }
            }
        }
    }

    /// Removes a stream's channel, e.g. once a terminal event has been
    /// sent or the client disconnects (§4.E).
    pub async fn close(&self, stream_id: Uuid) {
        self.senders.write().await.remove(&stream_id);
        let mut chat_streams = self.chat_streams.write().await;
        chat_streams.retain(|_, streams| {
            streams.remove(&stream_id);
            !streams.is_empty()
        });
        debug!(%stream_id, "stream hub: closed stream");
    }

    pub async fn stream_count(&self) -> usize {
        self.senders.read().await.len()
    }
}
