//! Stdio upstream transport: a child process speaking newline-delimited JSON-RPC.
//!
//! Grounded on the teacher's `child_process.rs` (hybrid mutex pattern: a plain
//! `tokio::sync::Mutex` around the child's stdin since writes cross `.await`,
//! atomics/`RwLock` for everything else) and `frontends/stdio.rs` (line framing),
//! adapted here to the gateway's role as the MCP *client* of the subprocess
//! rather than its frontend.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, trace, warn};

use super::{framework, pending::PendingRequests, schema, timeout_for_tool, CorrelationIdGenerator, ListChangedCallback, UnifiedTransport, INITIALIZE_TIMEOUT, MCP_PROTOCOL_VERSION};
use crate::error::{GatewayError, GatewayResult};
use crate::model::{Framework, Resource, Tool};

/// Maximum line size accepted from a child's stdout (10 MiB).
const MAX_LINE_SIZE: usize = 10 * 1024 * 1024;

pub struct StdioTransportConfig {
    pub upstream: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

pub struct StdioTransport {
    config: StdioTransportConfig,
    child: AsyncMutex<Option<Child>>,
    stdin: AsyncMutex<Option<tokio::process::ChildStdin>>,
    pending: PendingRequests,
    correlation: CorrelationIdGenerator,
    running: AtomicBool,
    framework: parking_lot::RwLock<Framework>,
    tools: parking_lot::RwLock<Vec<Tool>>,
    resources: parking_lot::RwLock<Vec<Resource>>,
    on_list_changed: ListChangedCallback,
    self_ref: OnceLock<Weak<StdioTransport>>,
}

impl StdioTransport {
    /// Construct the transport wrapped in an `Arc`, so `start` can hand the
    /// reader tasks a strong handle that outlives the call without a
    /// back-pointer from the gateway (spec §9, "cyclic references").
    pub fn spawn(config: StdioTransportConfig, on_list_changed: ListChangedCallback) -> Arc<Self> {
        let correlation = CorrelationIdGenerator::new(config.upstream.clone());
        let this = Arc::new(Self {
            config,
            child: AsyncMutex::new(None),
            stdin: AsyncMutex::new(None),
            pending: PendingRequests::new(),
            correlation,
            running: AtomicBool::new(false),
            framework: parking_lot::RwLock::new(Framework::Unknown),
            tools: parking_lot::RwLock::new(Vec::new()),
            resources: parking_lot::RwLock::new(Vec::new()),
            on_list_changed,
            self_ref: OnceLock::new(),
        });
        let _ = this.self_ref.set(Arc::downgrade(&this));
        this
    }

    /// Rewrite host-side invocations when running inside a container, per spec §4.1.
    fn containerized_rewrite(command: &str, args: &[String]) -> (String, Vec<String>) {
        if !std::path::Path::new("/.dockerenv").exists() {
            return (command.to_string(), args.to_vec());
        }

        let lower = command.to_ascii_lowercase();
        if lower == "cmd" && args.first().map(String::as_str) == Some("/c") {
            if let Some((head, rest)) = args.split_first() {
                let _ = head;
                if let Some((cmd, rest_args)) = rest.split_first() {
                    return (cmd.clone(), rest_args.to_vec());
                }
            }
        }
        if lower.contains("powershell") {
            if let Some(pos) = args.iter().position(|a| a == "-Command") {
                if let Some(payload) = args.get(pos + 1) {
                    let parts: Vec<String> = payload.split_whitespace().map(String::from).collect();
                    if let Some((cmd, rest)) = parts.split_first() {
                        return (cmd.clone(), rest.to_vec());
                    }
                }
            }
        }

        let command = command.strip_suffix(".exe").unwrap_or(command).to_string();

        let mut args = args.to_vec();
        if command == "npx" {
            if !args.iter().any(|a| a == "--yes" || a == "-y") {
                args.insert(0, "--yes".to_string());
            }
        }
        let args = args
            .into_iter()
            .map(|a| a.replace("localhost:", "host.docker.internal:"))
            .collect();

        (command, args)
    }

    async fn write_request(&self, payload: &Value) -> GatewayResult<()> {
        let mut line = serde_json::to_string(payload)?;
        line.push('\n');
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| GatewayError::transport_startup(&self.config.upstream, "stdin closed"))?;
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            self.running.store(false, Ordering::SeqCst);
            return Err(GatewayError::transport_startup(&self.config.upstream, e.to_string()));
        }
        stdin
            .flush()
            .await
            .map_err(|e| GatewayError::transport_startup(&self.config.upstream, e.to_string()))?;
        Ok(())
    }

    async fn send_request(&self, method: &str, params: Value, timeout: Duration) -> GatewayResult<Value> {
        let id = self.correlation.next();
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let rx = self.pending.insert(id.clone());
        self.write_request(&payload).await?;
        super::pending::await_with_timeout(rx, &self.pending, &id, &self.config.upstream, method, timeout).await
    }

    async fn send_notification(&self, method: &str, params: Value) -> GatewayResult<()> {
        let payload = json!({"jsonrpc": "2.0", "method": method, "params": params});
        self.write_request(&payload).await
    }

    fn spawn_reader_tasks(&self, stdout: tokio::process::ChildStdout, stderr: tokio::process::ChildStderr) -> GatewayResult<()> {
        let this = self
            .self_ref
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| GatewayError::internal("StdioTransport must be constructed via StdioTransport::spawn"))?;
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(upstream = %this.config.upstream, "stdout closed");
                        break;
                    }
                    Ok(_) => {
                        if line.len() > MAX_LINE_SIZE {
                            warn!(upstream = %this.config.upstream, "dropped oversized stdout line");
                            continue;
                        }
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        this.handle_line(trimmed).await;
                    }
                    Err(e) => {
                        error!(upstream = %this.config.upstream, error = %e, "stdout read error");
                        break;
                    }
                }
            }
            this.running.store(false, Ordering::SeqCst);
            this.pending.cancel_all();
        });

        let upstream_name = self.config.upstream.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => trace!(upstream = %upstream_name, stderr = %line.trim(), "child stderr"),
                    Err(_) => break,
                }
            }
        });

        Ok(())
    }

    async fn handle_line(&self, line: &str) {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => {
                warn!(upstream = %self.config.upstream, line, "non-JSON stdout line dropped");
                return;
            }
        };

        let id = value.get("id").and_then(Value::as_str).map(str::to_string);
        let method = value.get("method").and_then(Value::as_str);

        if let Some(method) = method {
            if id.is_none() {
                self.handle_notification(method);
                return;
            }
        }

        let Some(id) = id else { return };

        if let Some(error) = value.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32603) as i32;
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("upstream error")
                .to_string();
            self.pending.fail(&id, code, message);
        } else {
            let result = value.get("result").cloned().unwrap_or(Value::Null);
            self.pending.resolve(&id, result);
        }
    }

    fn handle_notification(&self, method: &str) {
        match method {
            "notifications/tools/list_changed" | "notifications/resources/list_changed" => {
                debug!(upstream = %self.config.upstream, method, "list-changed notification, requesting re-list");
                (self.on_list_changed)(&self.config.upstream);
            }
            other => trace!(upstream = %self.config.upstream, method = other, "unhandled notification"),
        }
    }
}

#[async_trait]
impl UnifiedTransport for StdioTransport {
    async fn start(&self) -> GatewayResult<()> {
        let (command, args) = Self::containerized_rewrite(&self.config.command, &self.config.args);

        let mut cmd = Command::new(&command);
        cmd.args(&args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| GatewayError::transport_startup(&self.config.upstream, e.to_string()))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::transport_startup(&self.config.upstream, "no stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| GatewayError::transport_startup(&self.config.upstream, "no stderr"))?;

        *self.stdin.lock().await = stdin;
        *self.child.lock().await = Some(child);
        self.running.store(true, Ordering::SeqCst);

        self.spawn_reader_tasks(stdout, stderr)?;

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

        info!(upstream = %self.config.upstream, "stdio upstream connected");
        Ok(())
    }

    async fn stop(&self) -> GatewayResult<()> {
        self.running.store(false, Ordering::SeqCst);
        self.pending.cancel_all();
        *self.stdin.lock().await = None;

        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                }
            }
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

impl StdioTransport {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containerized_rewrite_noop_outside_container() {
        let (cmd, args) = StdioTransport::containerized_rewrite("cmd", &["/c".to_string(), "python".to_string()]);
        // /.dockerenv won't exist in the test sandbox in the common case.
        if !std::path::Path::new("/.dockerenv").exists() {
            assert_eq!(cmd, "cmd");
            assert_eq!(args, vec!["/c".to_string(), "python".to_string()]);
        }
    }
}
