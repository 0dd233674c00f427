//! SSE connection registry: outbound event queues and the "most recently
//! opened still-unlinked connection" linking rule (spec §4.4).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Fixed outbound queue capacity per SSE connection (spec §4.4 "Backpressure").
pub const QUEUE_CAPACITY: usize = 100;
/// Enqueue timeout before a slow/stuck client is dropped.
pub const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);
/// Idle interval after which the loop emits a keepalive `ping`.
pub const IDLE_PING_INTERVAL: Duration = Duration::from_secs(60);

/// A named SSE frame: `event: <name>\ndata: <payload>\n\n`.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub event: &'static str,
    pub data: Value,
}

impl OutboundEvent {
    pub fn endpoint(post_url: impl Into<String>) -> Self {
        Self {
            event: "endpoint",
            data: Value::String(post_url.into()),
        }
    }

    pub fn message(payload: Value) -> Self {
        Self { event: "message", data: payload }
    }

    pub fn ping(now_epoch_ms: i64) -> Self {
        Self {
            event: "ping",
            data: serde_json::json!({ "timestamp": now_epoch_ms }),
        }
    }
}

pub struct SseConnection {
    pub id: String,
    pub session_id: RwLock<Option<String>>,
    sender: mpsc::Sender<OutboundEvent>,
}

impl SseConnection {
    /// Enqueue with a bounded, non-blocking put; drop the client on timeout
    /// or a full queue (spec §4.4 "Backpressure and queues").
    pub async fn enqueue(&self, event: OutboundEvent) -> bool {
        match tokio::time::timeout(ENQUEUE_TIMEOUT, self.sender.send(event)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                warn!(connection = %self.id, "SSE enqueue timed out, dropping client");
                false
            }
        }
    }
}

/// Tracks open SSE connections and their insertion order, so the handshake
/// can find the most recently opened connection still awaiting a session
/// link (spec §4.4 step 2).
#[derive(Default)]
pub struct SseRegistry {
    connections: DashMap<String, Arc<SseConnection>>,
    order: parking_lot::Mutex<Vec<String>>,
}

impl SseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection, returning it plus the receiver the GET
    /// handler's stream drains.
    pub fn open(&self) -> (Arc<SseConnection>, mpsc::Receiver<OutboundEvent>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let conn = Arc::new(SseConnection {
            id: Uuid::new_v4().to_string(),
            session_id: RwLock::new(None),
            sender: tx,
        });
        self.order.lock().push(conn.id.clone());
        self.connections.insert(conn.id.clone(), conn.clone());
        (conn, rx)
    }

    pub fn remove(&self, id: &str) {
        self.connections.remove(id);
        self.order.lock().retain(|x| x != id);
    }

    pub fn link(&self, connection_id: &str, session_id: &str) {
        if let Some(conn) = self.connections.get(connection_id) {
            *conn.session_id.write() = Some(session_id.to_string());
        }
    }

    /// The most recently opened connection with no session linked yet.
    pub fn most_recent_unlinked(&self) -> Option<Arc<SseConnection>> {
        let order = self.order.lock();
        order.iter().rev().find_map(|id| {
            self.connections
                .get(id)
                .filter(|c| c.session_id.read().is_none())
                .map(|c| c.value().clone())
        })
    }

    pub fn linked_to(&self, session_id: &str) -> Option<Arc<SseConnection>> {
        self.connections
            .iter()
            .find(|e| e.value().session_id.read().as_deref() == Some(session_id))
            .map(|e| e.value().clone())
    }

    pub fn any_session_linked(&self) -> Option<Arc<SseConnection>> {
        self.connections
            .iter()
            .find(|e| e.value().session_id.read().is_some())
            .map(|e| e.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_recent_unlinked_picks_latest() {
        let registry = SseRegistry::new();
        let (first, _rx1) = registry.open();
        let (second, _rx2) = registry.open();
        let found = registry.most_recent_unlinked().unwrap();
        assert_eq!(found.id, second.id);

        registry.link(&second.id, "session-a");
        let found = registry.most_recent_unlinked().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[test]
    fn linked_to_finds_by_session() {
        let registry = SseRegistry::new();
        let (conn, _rx) = registry.open();
        registry.link(&conn.id, "session-a");
        let found = registry.linked_to("session-a").unwrap();
        assert_eq!(found.id, conn.id);
        assert!(registry.linked_to("session-b").is_none());
    }

    #[tokio::test]
    async fn enqueue_succeeds_within_capacity() {
        let registry = SseRegistry::new();
        let (conn, mut rx) = registry.open();
        assert!(conn.enqueue(OutboundEvent::ping(0)).await);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event, "ping");
    }
}
