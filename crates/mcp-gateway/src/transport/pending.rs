//! Per-upstream correlation-id → completion-handle map.
//!
//! Grounded on the teacher's `IdTranslator` (DashMap-based bidirectional id
//! mapping with bounded size and timeout eviction); here the mapping is
//! one-directional (correlation id → oneshot sender) since the gateway mints
//! its own ids rather than translating someone else's.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{GatewayError, GatewayResult};

/// Maximum number of pending requests tracked per upstream before the oldest
/// entries are evicted defensively (mirrors the teacher's `MAX_MAPPINGS`).
const MAX_PENDING: usize = 10_000;

type PendingResult = Result<Value, (i32, String)>;

struct Entry {
    sender: oneshot::Sender<PendingResult>,
    inserted_at: Instant,
}

/// Tracks in-flight requests for one upstream, keyed by correlation id.
pub struct PendingRequests {
    entries: DashMap<String, Entry>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register a new pending request, returning the receiver half.
    pub fn insert(&self, correlation_id: String) -> oneshot::Receiver<PendingResult> {
        let (tx, rx) = oneshot::channel();
        if self.entries.len() >= MAX_PENDING {
            self.evict_oldest();
        }
        self.entries.insert(
            correlation_id,
            Entry {
                sender: tx,
                inserted_at: Instant::now(),
            },
        );
        rx
    }

    /// Resolve a pending request with a successful result. Late/unknown ids are
    /// silently discarded (spec §5: "late responses are discarded with a debug log").
    pub fn resolve(&self, correlation_id: &str, result: Value) {
        if let Some((_, entry)) = self.entries.remove(correlation_id) {
            let _ = entry.sender.send(Ok(result));
        } else {
            tracing::debug!(correlation_id, "discarding response for unknown/late request");
        }
    }

    /// Fail a pending request with an upstream-forwarded JSON-RPC error.
    pub fn fail(&self, correlation_id: &str, code: i32, message: String) {
        if let Some((_, entry)) = self.entries.remove(correlation_id) {
            let _ = entry.sender.send(Err((code, message)));
        }
    }

    /// Cancel every pending request, e.g. when the transport stops.
    pub fn cancel_all(&self) {
        self.entries.retain(|_, _| false);
    }

    /// Remove a pending entry without resolving it, e.g. on timeout.
    pub fn remove(&self, correlation_id: &str) {
        self.entries.remove(correlation_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        if let Some(oldest) = self
            .entries
            .iter()
            .min_by_key(|e| e.inserted_at)
            .map(|e| e.key().clone())
        {
            self.entries.remove(&oldest);
        }
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

/// Await a pending request's receiver with a deadline, mapping the result onto
/// [`GatewayError`] (spec §4.1 common contract: `Timeout`, `UpstreamError`, `Cancelled`).
///
/// On timeout, removes `correlation_id` from `pending` itself (spec §5: "expiry
/// removes the pending entry and fails the caller with Timeout") rather than
/// leaving it to linger until a late response, `cancel_all`, or eviction.
pub async fn await_with_timeout(
    rx: oneshot::Receiver<PendingResult>,
    pending: &PendingRequests,
    correlation_id: &str,
    upstream: &str,
    tool: &str,
    timeout: Duration,
) -> GatewayResult<Value> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err((code, message)))) => Err(GatewayError::upstream_error(upstream, code, message)),
        Ok(Err(_recv_error)) => Err(GatewayError::cancelled(upstream, tool)),
        Err(_elapsed) => {
            pending.remove(correlation_id);
            Err(GatewayError::timeout(upstream, tool, timeout.as_millis() as u64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_completes_the_waiter() {
        let pending = PendingRequests::new();
        let rx = pending.insert("alpha_0_deadbeef".to_string());
        pending.resolve("alpha_0_deadbeef", serde_json::json!({"ok": true}));
        let result = await_with_timeout(rx, &pending, "alpha_0_deadbeef", "alpha", "tool", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn fail_forwards_upstream_error_code() {
        let pending = PendingRequests::new();
        let rx = pending.insert("alpha_0_deadbeef".to_string());
        pending.fail("alpha_0_deadbeef", -32000, "boom".to_string());
        let err = await_with_timeout(rx, &pending, "alpha_0_deadbeef", "alpha", "tool", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.to_jsonrpc(), (-32000, "boom".to_string()));
    }

    #[tokio::test]
    async fn timeout_elapses_when_never_resolved() {
        let pending = PendingRequests::new();
        let rx = pending.insert("alpha_0_deadbeef".to_string());
        let err = await_with_timeout(rx, &pending, "alpha_0_deadbeef", "alpha", "tool", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { .. }));
        assert_eq!(pending.len(), 0, "timeout removes the pending entry instead of leaving it to linger");
    }

    #[test]
    fn resolve_on_unknown_id_is_a_noop() {
        let pending = PendingRequests::new();
        pending.resolve("nonexistent", serde_json::json!(null));
        assert!(pending.is_empty());
    }

    #[test]
    fn cancel_all_empties_the_map() {
        let pending = PendingRequests::new();
        let _rx1 = pending.insert("a".to_string());
        let _rx2 = pending.insert("b".to_string());
        assert_eq!(pending.len(), 2);
        pending.cancel_all();
        assert!(pending.is_empty());
    }
}
