//! Unified upstream transport: a single interface over stdio and HTTP+SSE upstreams.
//!
//! ## Modules
//!
//! - `framework` - Standard/Fast classification, affecting only defaults
//! - `schema` - JSON Schema normalization for `list_tools`
//! - `pending` - per-upstream correlation-id → completion-handle map
//! - `stdio` - child-process newline-delimited JSON-RPC transport
//! - `http_sse` - HTTP POST + SSE stream transport

pub mod framework;
pub mod http_sse;
pub mod pending;
pub mod schema;
pub mod stdio;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::GatewayResult;
use crate::model::{Framework, Resource, Tool};

/// Callback the gateway injects into each transport so it can request an
/// aggregator rebuild without the transport holding a back-pointer to the
/// gateway (spec §9, "cyclic references").
pub type ListChangedCallback = std::sync::Arc<dyn Fn(&str) + Send + Sync>;

/// Common interface over any upstream MCP connection, stdio or HTTP+SSE.
#[async_trait]
pub trait UnifiedTransport: Send + Sync {
    /// Perform the `initialize` handshake and populate tools/resources.
    async fn start(&self) -> GatewayResult<()>;

    /// Tear down the connection (kill the child process, drop the SSE stream).
    async fn stop(&self) -> GatewayResult<()>;

    async fn list_tools(&self) -> GatewayResult<Vec<Tool>>;

    async fn list_resources(&self) -> GatewayResult<Vec<Resource>>;

    async fn call_tool(&self, name: &str, arguments: Value, timeout: Duration) -> GatewayResult<Value>;

    async fn read_resource(&self, uri: &str, timeout: Duration) -> GatewayResult<Value>;

    /// Issue a cheap `ping` (or equivalent) to verify liveness.
    async fn health_check(&self) -> GatewayResult<()>;

    fn is_running(&self) -> bool;

    fn framework(&self) -> Framework;
}

/// Monotonic per-upstream counter feeding the correlation-id format
/// `"<upstream>_<monotonic_counter>_<8-hex-random>"` (spec §4.1).
pub struct CorrelationIdGenerator {
    upstream: String,
    counter: AtomicU64,
}

impl CorrelationIdGenerator {
    pub fn new(upstream: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let suffix: u32 = rand::random();
        format!("{}_{}_{:08x}", self.upstream, n, suffix & 0xffff_ffff)
    }
}

/// Per-tool-name timeout selection (spec §4.1 "Timeouts").
pub fn timeout_for_tool(name: &str, framework: Framework) -> Duration {
    const SLOW_KEYWORDS: &[&str] = &[
        "search", "query", "find", "fetch", "crawl", "scrape", "download", "api_call",
        "http_request", "web",
    ];
    const MEDIUM_KEYWORDS: &[&str] = &["generate", "completion", "embedding", "analyze", "summarize"];

    let lower = name.to_ascii_lowercase();
    let base_secs = if SLOW_KEYWORDS.iter().any(|k| lower.contains(k)) {
        120
    } else if MEDIUM_KEYWORDS.iter().any(|k| lower.contains(k)) {
        90
    } else {
        60
    };

    let secs = match framework {
        Framework::Fast if base_secs == 60 => 75,
        _ => base_secs,
    };
    Duration::from_secs(secs)
}

/// Fixed timeout for the `initialize` handshake.
pub const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(30);

/// MCP protocol version this gateway speaks to upstreams.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
