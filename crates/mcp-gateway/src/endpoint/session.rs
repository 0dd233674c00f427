//! Downstream client sessions: `{id, client_info, protocol_version, initialized}`
//! (spec §4.4 "Handshake").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::transport::MCP_PROTOCOL_VERSION;

pub struct Session {
    pub id: String,
    pub client_info: parking_lot::RwLock<Option<Value>>,
    pub protocol_version: parking_lot::RwLock<String>,
    initialized: AtomicBool,
    /// Set when created via the auto-session escape hatch (spec §4.4).
    pub auto_created: bool,
}

impl Session {
    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }
}

/// Access-serialized via `DashMap` per spec §5 ("Sessions table ... mutated
/// by endpoint handlers only").
#[derive(Default)]
pub struct SessionTable(DashMap<String, Arc<Session>>);

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, auto_created: bool) -> Arc<Session> {
        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Session {
            id: id.clone(),
            client_info: parking_lot::RwLock::new(None),
            protocol_version: parking_lot::RwLock::new(MCP_PROTOCOL_VERSION.to_string()),
            initialized: AtomicBool::new(auto_created),
            auto_created,
        });
        self.0.insert(id, session.clone());
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.0.get(id).map(|e| e.value().clone())
    }

    pub fn remove(&self, id: &str) {
        self.0.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_created_session_starts_initialized() {
        let table = SessionTable::new();
        let session = table.create(true);
        assert!(session.initialized());
        assert!(session.auto_created);
    }

    #[test]
    fn regular_session_starts_uninitialized() {
        let table = SessionTable::new();
        let session = table.create(false);
        assert!(!session.initialized());
        session.mark_initialized();
        assert!(session.initialized());
    }
}
