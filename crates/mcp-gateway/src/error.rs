//! Error types for mcp-gateway
//!
//! Follows the gateway's error taxonomy: config, transport startup, protocol,
//! timeout/cancellation, upstream-forwarded errors, not-found, and internal.

use thiserror::Error;

/// Result type for gateway operations
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Main error type for the gateway
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// Invalid configuration (bad JSON, missing command/url, bad name, unknown transport)
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        key: Option<String>,
    },

    /// Could not spawn a process or open a stream for an upstream
    #[error("Failed to start transport for upstream '{upstream}': {message}")]
    TransportStartup { upstream: String, message: String },

    /// Malformed JSON or JSON-RPC on either direction
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    /// An upstream call exceeded its deadline
    #[error("Timeout: '{tool}' on upstream '{upstream}' exceeded {timeout_ms}ms")]
    Timeout {
        upstream: String,
        tool: String,
        timeout_ms: u64,
    },

    /// An in-flight call was cancelled (upstream stopped, client disconnected)
    #[error("Cancelled: '{tool}' on upstream '{upstream}'")]
    Cancelled { upstream: String, tool: String },

    /// Upstream returned a JSON-RPC error; code is preserved verbatim
    #[error("Upstream error ({code}): {message}")]
    UpstreamError {
        upstream: String,
        code: i32,
        message: String,
    },

    /// An upstream that exists but is not Connected was targeted
    #[error("Upstream '{0}' is not connected")]
    UpstreamUnavailable(String),

    /// Unknown tool name, resource uri, upstream, or session
    #[error("Not found: {kind} '{id}'")]
    NotFound { kind: &'static str, id: String },

    /// Any other unexpected condition
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error talking to a network upstream
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl GatewayError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            key: None,
        }
    }

    /// Create a configuration error naming the offending key
    pub fn config_with_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create a transport startup error
    pub fn transport_startup(upstream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransportStartup {
            upstream: upstream.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(upstream: impl Into<String>, tool: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            upstream: upstream.into(),
            tool: tool.into(),
            timeout_ms,
        }
    }

    /// Create a cancellation error
    pub fn cancelled(upstream: impl Into<String>, tool: impl Into<String>) -> Self {
        Self::Cancelled {
            upstream: upstream.into(),
            tool: tool.into(),
        }
    }

    /// Wrap a JSON-RPC error forwarded verbatim from an upstream
    pub fn upstream_error(upstream: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self::UpstreamError {
            upstream: upstream.into(),
            code,
            message: message.into(),
        }
    }

    /// Create a not-found error for a tool
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "tool",
            id: name.into(),
        }
    }

    /// Create a not-found error for a resource
    pub fn resource_not_found(uri: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "resource",
            id: uri.into(),
        }
    }

    /// Create a not-found error for an upstream
    pub fn upstream_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "upstream",
            id: name.into(),
        }
    }

    /// Create a not-found error for a session
    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "session",
            id: id.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Sanitize error message for downstream client responses
    ///
    /// Removes internal details (paths, process info) to prevent information disclosure.
    pub fn sanitize(&self) -> String {
        match self {
            Self::Config { .. } => "Configuration error".to_string(),
            Self::TransportStartup { upstream, .. } => {
                format!("Upstream '{upstream}' failed to start")
            }
            Self::Protocol { .. } => "Protocol error".to_string(),
            Self::Timeout { tool, timeout_ms, .. } => {
                format!("'{tool}' timed out after {timeout_ms}ms")
            }
            Self::Cancelled { tool, .. } => format!("'{tool}' was cancelled"),
            Self::UpstreamError { message, .. } => message.clone(),
            Self::UpstreamUnavailable(name) => format!("Upstream '{name}' is unavailable"),
            Self::NotFound { kind, id } => format!("{kind} '{id}' not found"),
            Self::Internal(_) => "Internal error".to_string(),
            Self::Serialization(_) => "Data serialization error".to_string(),
            Self::Io(_) => "IO error occurred".to_string(),
            Self::Http(_) => "Upstream HTTP error".to_string(),
        }
    }

    /// Whether this error is worth automatically retrying (reconnect, etc.)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportStartup { .. } | Self::Timeout { .. } | Self::Io(_) | Self::Http(_)
        )
    }

    /// Map to a JSON-RPC `(code, message)` pair for the client-facing endpoint
    pub fn to_jsonrpc(&self) -> (i32, String) {
        match self {
            Self::NotFound { .. } => (-32601, self.sanitize()),
            Self::Config { .. } | Self::Protocol { .. } => (-32602, self.sanitize()),
            Self::UpstreamError { code, message, .. } => (*code, message.clone()),
            _ => (-32603, self.sanitize()),
        }
    }
}

/// Extension trait adding gateway error context to arbitrary results
pub trait GatewayErrorExt<T> {
    /// Wrap the error as a configuration error, naming the offending key
    fn config_context(self, key: impl Into<String>) -> GatewayResult<T>;

    /// Wrap the error as a transport startup error for the named upstream
    fn transport_context(self, upstream: impl Into<String>) -> GatewayResult<T>;
}

impl<T, E> GatewayErrorExt<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn config_context(self, key: impl Into<String>) -> GatewayResult<T> {
        self.map_err(|e| GatewayError::config_with_key(e.to_string(), key.into()))
    }

    fn transport_context(self, upstream: impl Into<String>) -> GatewayResult<T> {
        self.map_err(|e| GatewayError::transport_startup(upstream.into(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_expected_variant() {
        assert!(matches!(GatewayError::config("bad"), GatewayError::Config { .. }));
        assert!(matches!(
            GatewayError::tool_not_found("x"),
            GatewayError::NotFound { kind: "tool", .. }
        ));
    }

    #[test]
    fn sanitize_hides_internal_details() {
        let err = GatewayError::config_with_key("missing field foo at /etc/secret.json", "command");
        assert_eq!(err.sanitize(), "Configuration error");
    }

    #[test]
    fn retryable_classification() {
        assert!(GatewayError::timeout("u", "t", 1000).is_retryable());
        assert!(GatewayError::transport_startup("u", "boom").is_retryable());
        assert!(!GatewayError::config("bad").is_retryable());
        assert!(!GatewayError::tool_not_found("x").is_retryable());
    }

    #[test]
    fn upstream_error_code_preserved() {
        let err = GatewayError::upstream_error("u", -32000, "boom");
        assert_eq!(err.to_jsonrpc(), (-32000, "boom".to_string()));
    }

    #[test]
    fn unknown_errors_map_to_internal_jsonrpc_code() {
        let err = GatewayError::internal("whatever");
        assert_eq!(err.to_jsonrpc().0, -32603);
    }

    #[test]
    fn error_ext_adds_context() {
        let result: Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "nope"));
        let wrapped = result.config_context("host");
        match wrapped.unwrap_err() {
            GatewayError::Config { key, .. } => assert_eq!(key, Some("host".to_string())),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
