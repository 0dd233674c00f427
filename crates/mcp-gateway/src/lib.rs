//! mcp-gateway: aggregation gateway that fronts a fleet of MCP servers behind
//! one endpoint.
//!
//! Connects to multiple upstream MCP servers over stdio or HTTP/SSE, merges
//! their tools and resources into one prefixed, collision-free namespace, and
//! re-exposes the union as a single MCP Streamable HTTP + SSE endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Transport Layer                                         │
//! │ • StdioTransport / HttpTransport: per-upstream lifecycle │
//! └─────────────────────────────────────────────────────────┘
//!                           ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │ Gateway Layer                                            │
//! │ • Gateway: owns upstreams, health loop, reconnects       │
//! │ • Aggregator: ArcSwap-published merged tool/resource set │
//! └─────────────────────────────────────────────────────────┘
//!                           ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │ Endpoint Layer                                           │
//! │ • Streamable HTTP + SSE, sessions, JSON-RPC dispatch     │
//! └─────────────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod aggregator;
pub mod cli;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod gateway;
pub mod model;
pub mod transport;

pub use error::{GatewayError, GatewayResult};

/// Common imports for embedding the gateway in another binary.
pub mod prelude {
    pub use crate::config::{GatewaySettings, McpServersConfig, UpstreamConfig};
    pub use crate::error::{GatewayError, GatewayResult};
    pub use crate::gateway::Gateway;
    pub use crate::model::{Upstream, UpstreamStatus};
}

/// Version of mcp-gateway.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// MCP protocol version this gateway speaks to upstreams and downstream clients.
pub const MCP_PROTOCOL_VERSION: &str = crate::transport::MCP_PROTOCOL_VERSION;
