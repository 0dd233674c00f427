//! HTTP upstream transport: a plain POST/response leg, or a POST leg paired
//! with a long-lived SSE stream leg, selected by [`NetworkTransportKind`].
//!
//! Grounded on the teacher's `backends/http.rs` (reqwest client construction,
//! auth header, request/response framing) for the plain `Http` kind; the
//! `Sse` kind's chunked buffering is grounded on `radium-models`'
//! `GeminiSSEStream` (split incoming bytes on blank lines, parse `data:`
//! payloads), adapted from a `Stream` impl into a background reconnect loop
//! since nothing downstream polls this transport as a `Stream`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{framework, pending::PendingRequests, schema, timeout_for_tool, CorrelationIdGenerator, ListChangedCallback, UnifiedTransport, INITIALIZE_TIMEOUT, MCP_PROTOCOL_VERSION};
use crate::config::NetworkTransportKind;
use crate::error::{GatewayError, GatewayResult};
use crate::model::{Framework, Resource, Tool};

pub struct HttpTransportConfig {
    pub upstream: String,
    pub base_url: String,
    pub kind: NetworkTransportKind,
    pub sse_endpoint: String,
    pub messages_endpoint: String,
    pub max_retries: u32,
}

pub struct HttpTransport {
    config: HttpTransportConfig,
    client: reqwest::Client,
    pending: PendingRequests,
    correlation: CorrelationIdGenerator,
    running: AtomicBool,
    retry_count: AtomicU32,
    framework: parking_lot::RwLock<Framework>,
    tools: parking_lot::RwLock<Vec<Tool>>,
    resources: parking_lot::RwLock<Vec<Resource>>,
    on_list_changed: ListChangedCallback,
    stream_task: AsyncMutex<Option<JoinHandle<()>>>,
    self_ref: OnceLock<Weak<HttpTransport>>,
}

impl HttpTransport {
    pub fn spawn(config: HttpTransportConfig, on_list_changed: ListChangedCallback) -> GatewayResult<Arc<Self>> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| GatewayError::transport_startup(&config.upstream, e.to_string()))?;

        let correlation = CorrelationIdGenerator::new(config.upstream.clone());
        let this = Arc::new(Self {
            config,
            client,
            pending: PendingRequests::new(),
            correlation,
            running: AtomicBool::new(false),
            retry_count: AtomicU32::new(0),
            framework: parking_lot::RwLock::new(Framework::Unknown),
            tools: parking_lot::RwLock::new(Vec::new()),
            resources: parking_lot::RwLock::new(Vec::new()),
            on_list_changed,
            stream_task: AsyncMutex::new(None),
            self_ref: OnceLock::new(),
        });
        let _ = this.self_ref.set(Arc::downgrade(&this));
        Ok(this)
    }

    fn messages_url(&self) -> String {
        format!("{}{}", self.config.base_url, self.config.messages_endpoint)
    }

    fn sse_url(&self) -> String {
        format!("{}{}", self.config.base_url, self.config.sse_endpoint)
    }

    /// Post a JSON-RPC payload, common to both the `Http` and `Sse` kinds.
    async fn post(&self, payload: &Value) -> GatewayResult<reqwest::Response> {
        let response = self
            .client
            .post(self.messages_url())
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| GatewayError::transport_startup(&self.config.upstream, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::upstream_error(&self.config.upstream, i32::from(status.as_u16()), body));
        }
        Ok(response)
    }

    /// `Http` kind: the POST response body *is* the JSON-RPC response.
    async fn send_request_http(&self, method: &str, params: Value) -> GatewayResult<Value> {
        let id = self.correlation.next();
        let payload = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        let response = self.post(&payload).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::transport_startup(&self.config.upstream, e.to_string()))?;

        if let Some(error) = body.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32603) as i32;
            let message = error.get("message").and_then(Value::as_str).unwrap_or("upstream error").to_string();
            return Err(GatewayError::upstream_error(&self.config.upstream, code, message));
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    /// `Sse` kind: POST only enqueues the request; the response arrives on the stream leg.
    async fn send_request_sse(&self, method: &str, params: Value, timeout: Duration) -> GatewayResult<Value> {
        let id = self.correlation.next();
        let payload = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        let rx = self.pending.insert(id.clone());
        self.post(&payload).await?;
        super::pending::await_with_timeout(rx, &self.pending, &id, &self.config.upstream, method, timeout).await
    }

    async fn send_request(&self, method: &str, params: Value, timeout: Duration) -> GatewayResult<Value> {
        match self.config.kind {
            NetworkTransportKind::Http => self.send_request_http(method, params).await,
            NetworkTransportKind::Sse => self.send_request_sse(method, params, timeout).await,
        }
    }

    async fn send_notification(&self, method: &str, params: Value) -> GatewayResult<()> {
        let payload = json!({"jsonrpc": "2.0", "method": method, "params": params});
        self.post(&payload).await.map(|_| ())
    }

    fn handle_line(&self, line: &str) {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => {
                trace!(upstream = %self.config.upstream, "discarding non-JSON SSE data line");
                return;
            }
        };

        if value.get("type").and_then(Value::as_str) == Some("endpoint") {
            debug!(upstream = %self.config.upstream, "endpoint event received, POST URL already known");
            return;
        }

        let id = value.get("id").and_then(Value::as_str).map(str::to_string);
        let method = value.get("method").and_then(Value::as_str);

        if let Some(method) = method {
            if id.is_none() {
                match method {
                    "notifications/tools/list_changed" | "notifications/resources/list_changed" => {
                        (self.on_list_changed)(&self.config.upstream);
                    }
                    other => trace!(upstream = %self.config.upstream, method = other, "unhandled notification"),
                }
                return;
            }
        }

        let Some(id) = id else { return };
        if let Some(error) = value.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32603) as i32;
            let message = error.get("message").and_then(Value::as_str).unwrap_or("upstream error").to_string();
            self.pending.fail(&id, code, message);
        } else {
            let result = value.get("result").cloned().unwrap_or(Value::Null);
            self.pending.resolve(&id, result);
        }
    }

    /// One pass of the stream leg: connect, read until EOF or error. Returns
    /// `Ok(())` on a clean EOF, `Err` on connection or status failure.
    async fn stream_once(&self) -> GatewayResult<()> {
        let response = self
            .client
            .get(self.sse_url())
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| GatewayError::transport_startup(&self.config.upstream, e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::transport_startup(&self.config.upstream, format!("SSE endpoint returned {}", response.status())));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| GatewayError::transport_startup(&self.config.upstream, e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(end) = buffer.find("\n\n") {
                let event = buffer[..end].to_string();
                buffer = buffer[end + 2..].to_string();
                for raw_line in event.lines() {
                    if let Some(data) = raw_line.strip_prefix("data:") {
                        self.handle_line(data.trim());
                    }
                }
            }
        }
        Ok(())
    }

    /// Reconnect loop with exponential backoff (1, 2, 4, ..., capped at 30s),
    /// giving up after `max_retries` consecutive failures (spec §4.1).
    async fn stream_loop(self: Arc<Self>) {
        let mut backoff_secs = 1u64;
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            match self.stream_once().await {
                Ok(()) => {
                    debug!(upstream = %self.config.upstream, "SSE stream closed (EOF), reconnecting");
                }
                Err(e) => {
                    warn!(upstream = %self.config.upstream, error = %e, "SSE stream error, reconnecting");
                }
            }

            if !self.running.load(Ordering::SeqCst) {
                return;
            }

            let attempt = self.retry_count.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > self.config.max_retries {
                warn!(upstream = %self.config.upstream, "SSE stream exhausted retries, marking transport down");
                self.running.store(false, Ordering::SeqCst);
                self.pending.cancel_all();
                return;
            }

            tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            backoff_secs = (backoff_secs * 2).min(30);
        }
    }

    async fn refresh_tools(&self) -> GatewayResult<()> {
        let result = self
            .send_request("tools/list", json!({}), timeout_for_tool("tools/list", self.framework()))
            .await?;
        let raw_tools = result.get("tools").and_then(Value::as_array).cloned().unwrap_or_default();
        let fw = self.framework();
        let tools = raw_tools
            .into_iter()
            .map(|t| {
                let name = t.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                let description = t.get("description").and_then(Value::as_str).unwrap_or_default().to_string();
                let input_schema = if fw == Framework::Fast {
                    if let Some(args) = t.get("arguments").and_then(Value::as_array) {
                        schema::convert_fast_arguments(args)
                    } else {
                        schema::normalize_input_schema(&name, t.get("inputSchema"))
                    }
                } else {
                    schema::normalize_input_schema(&name, t.get("inputSchema"))
                };
                Tool { name, description, input_schema }
            })
            .collect();
        *self.tools.write() = tools;
        Ok(())
    }

    async fn refresh_resources(&self) -> GatewayResult<()> {
        let result = self
            .send_request("resources/list", json!({}), timeout_for_tool("resources/list", self.framework()))
            .await?;
        let raw = result.get("resources").and_then(Value::as_array).cloned().unwrap_or_default();
        let resources = raw
            .into_iter()
            .map(|r| Resource {
                uri: r.get("uri").and_then(Value::as_str).unwrap_or_default().to_string(),
                name: r.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                description: r.get("description").and_then(Value::as_str).map(str::to_string),
                mime_type: r.get("mimeType").and_then(Value::as_str).map(str::to_string),
            })
            .collect();
        *self.resources.write() = resources;
        Ok(())
    }
}

#[async_trait]
impl UnifiedTransport for HttpTransport {
    async fn start(&self) -> GatewayResult<()> {
        self.retry_count.store(0, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        if self.config.kind == NetworkTransportKind::Sse {
            let this = self
                .self_ref
                .get()
                .and_then(Weak::upgrade)
                .ok_or_else(|| GatewayError::internal("HttpTransport must be constructed via HttpTransport::spawn"))?;
            let handle = tokio::spawn(this.stream_loop());
            *self.stream_task.lock().await = Some(handle);
        }

        let init_result = self
            .send_request(
                "initialize",
                json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {"roots": {}, "sampling": {}},
                    "clientInfo": {"name": "mcp-gateway", "version": env!("CARGO_PKG_VERSION")},
                }),
                INITIALIZE_TIMEOUT,
            )
            .await?;

        let server_info = init_result.get("serverInfo").cloned().unwrap_or(Value::Null);
        let capabilities = init_result.get("capabilities").cloned().unwrap_or(Value::Null);
        *self.framework.write() = framework::classify(&server_info, &capabilities);

        self.send_notification("notifications/initialized", json!({})).await?;

        self.refresh_tools().await?;
        self.refresh_resources().await?;

        info!(upstream = %self.config.upstream, kind = ?self.config.kind, "http upstream connected");
        Ok(())
    }

    async fn stop(&self) -> GatewayResult<()> {
        self.running.store(false, Ordering::SeqCst);
        self.pending.cancel_all();
        if let Some(handle) = self.stream_task.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }

    async fn list_tools(&self) -> GatewayResult<Vec<Tool>> {
        Ok(self.tools.read().clone())
    }

    async fn list_resources(&self) -> GatewayResult<Vec<Resource>> {
        Ok(self.resources.read().clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value, timeout: Duration) -> GatewayResult<Value> {
        let fw = *self.framework.read();
        let encoded = framework::encode_arguments(fw, arguments);
        let result = self
            .send_request("tools/call", json!({"name": name, "arguments": encoded}), timeout)
            .await?;
        Ok(framework::unwrap_response(fw, result))
    }

    async fn read_resource(&self, uri: &str, timeout: Duration) -> GatewayResult<Value> {
        self.send_request("resources/read", json!({"uri": uri}), timeout).await
    }

    async fn health_check(&self) -> GatewayResult<()> {
        self.send_request("ping", json!({}), Duration::from_secs(10)).await?;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn framework(&self) -> Framework {
        *self.framework.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_callback() -> ListChangedCallback {
        Arc::new(|_: &str| {})
    }

    #[test]
    fn messages_url_preserves_empty_override() {
        let config = HttpTransportConfig {
            upstream: "alpha".to_string(),
            base_url: "http://localhost:9000".to_string(),
            kind: NetworkTransportKind::Sse,
            sse_endpoint: "/sse".to_string(),
            messages_endpoint: String::new(),
            max_retries: 3,
        };
        let transport = HttpTransport::spawn(config, noop_callback()).unwrap();
        assert_eq!(transport.messages_url(), "http://localhost:9000");
    }

    #[test]
    fn handle_line_discards_endpoint_events() {
        let config = HttpTransportConfig {
            upstream: "alpha".to_string(),
            base_url: "http://localhost:9000".to_string(),
            kind: NetworkTransportKind::Sse,
            sse_endpoint: "/sse".to_string(),
            messages_endpoint: "/messages".to_string(),
            max_retries: 3,
        };
        let transport = HttpTransport::spawn(config, noop_callback()).unwrap();
        transport.handle_line(r#"{"type":"endpoint","endpoint":"/messages?sessionId=1"}"#);
        assert!(transport.pending.is_empty());
    }

    #[tokio::test]
    async fn handle_line_resolves_pending_by_id() {
        let config = HttpTransportConfig {
            upstream: "alpha".to_string(),
            base_url: "http://localhost:9000".to_string(),
            kind: NetworkTransportKind::Sse,
            sse_endpoint: "/sse".to_string(),
            messages_endpoint: "/messages".to_string(),
            max_retries: 3,
        };
        let transport = HttpTransport::spawn(config, noop_callback()).unwrap();
        let rx = transport.pending.insert("alpha_0_deadbeef".to_string());
        transport.handle_line(r#"{"jsonrpc":"2.0","id":"alpha_0_deadbeef","result":{"ok":true}}"#);
        let result = super::super::pending::await_with_timeout(
            rx,
            &transport.pending,
            "alpha_0_deadbeef",
            "alpha",
            "tool",
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(result, json!({"ok": true}));
    }
}
