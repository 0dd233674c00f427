//! Request routing: `execute_tool` and `access_resource` (spec §4.3).

use std::time::{Duration, Instant};

use serde_json::Value;

use super::Gateway;
use crate::error::{GatewayError, GatewayResult};
use crate::model::UpstreamStatus;
use crate::transport::timeout_for_tool;

#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub tool_name: String,
    pub parameters: Value,
    /// Overrides the per-tool default timeout when set.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ToolCallResponse {
    pub tool: String,
    pub owner: String,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub execution_time: Duration,
}

#[derive(Debug, Clone)]
pub struct ResourceReadRequest {
    pub uri: String,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ResourceReadResponse {
    pub uri: String,
    pub owner: String,
    pub success: bool,
    pub content: Option<String>,
    pub mime_type: Option<String>,
    pub error: Option<String>,
    pub execution_time: Duration,
}

impl Gateway {
    /// 1. resolve via aggregator, 2. check owner is Connected, 3. invoke the
    /// transport with a per-tool timeout, 4. record stats, 5. return the
    /// envelope (spec §4.3 "Request routing").
    pub async fn execute_tool(&self, request: ToolCallRequest) -> GatewayResult<ToolCallResponse> {
        let aggregated = self
            .aggregator()
            .find_tool(&request.tool_name)
            .ok_or_else(|| GatewayError::tool_not_found(&request.tool_name))?;

        let upstream = self
            .upstream(&aggregated.owner_upstream)
            .ok_or_else(|| GatewayError::upstream_not_found(&aggregated.owner_upstream))?;
        if upstream.status() != UpstreamStatus::Connected {
            return Err(GatewayError::UpstreamUnavailable(aggregated.owner_upstream));
        }
        let transport = self
            .transport(&aggregated.owner_upstream)
            .ok_or_else(|| GatewayError::UpstreamUnavailable(aggregated.owner_upstream.clone()))?;

        let timeout = request
            .timeout
            .unwrap_or_else(|| timeout_for_tool(&aggregated.original, transport.framework()));

        let started = Instant::now();
        let outcome = transport.call_tool(&aggregated.original, request.parameters, timeout).await;
        let elapsed = started.elapsed();
        let now_ms = now_epoch_ms();

        Ok(match outcome {
            Ok(result) => {
                upstream.stats.record(true, elapsed, now_ms);
                ToolCallResponse {
                    tool: aggregated.prefixed,
                    owner: aggregated.owner_upstream,
                    success: true,
                    result: Some(result),
                    error: None,
                    execution_time: elapsed,
                }
            }
            Err(e) => {
                upstream.stats.record(false, elapsed, now_ms);
                ToolCallResponse {
                    tool: aggregated.prefixed,
                    owner: aggregated.owner_upstream,
                    success: false,
                    result: None,
                    error: Some(e.sanitize()),
                    execution_time: elapsed,
                }
            }
        })
    }

    /// The analogous flow for `read_resource` (spec §4.3).
    pub async fn access_resource(&self, request: ResourceReadRequest) -> GatewayResult<ResourceReadResponse> {
        let aggregated = self
            .aggregator()
            .find_resource(&request.uri)
            .ok_or_else(|| GatewayError::resource_not_found(&request.uri))?;

        let upstream = self
            .upstream(&aggregated.owner_upstream)
            .ok_or_else(|| GatewayError::upstream_not_found(&aggregated.owner_upstream))?;
        if upstream.status() != UpstreamStatus::Connected {
            return Err(GatewayError::UpstreamUnavailable(aggregated.owner_upstream));
        }
        let transport = self
            .transport(&aggregated.owner_upstream)
            .ok_or_else(|| GatewayError::UpstreamUnavailable(aggregated.owner_upstream.clone()))?;

        let timeout = request.timeout.unwrap_or_else(|| self.settings().connection_timeout());
        let started = Instant::now();
        let outcome = transport.read_resource(&aggregated.original, timeout).await;
        let elapsed = started.elapsed();
        let now_ms = now_epoch_ms();

        Ok(match outcome {
            Ok(result) => {
                upstream.stats.record(true, elapsed, now_ms);
                let (content, mime_type) = first_content_text(&result);
                ResourceReadResponse {
                    uri: aggregated.prefixed,
                    owner: aggregated.owner_upstream,
                    success: true,
                    content,
                    mime_type,
                    error: None,
                    execution_time: elapsed,
                }
            }
            Err(e) => {
                upstream.stats.record(false, elapsed, now_ms);
                ResourceReadResponse {
                    uri: aggregated.prefixed,
                    owner: aggregated.owner_upstream,
                    success: false,
                    content: None,
                    mime_type: None,
                    error: Some(e.sanitize()),
                    execution_time: elapsed,
                }
            }
        })
    }
}

/// `contents: [{text, mimeType}, ...]` → surface the first entry as `content`/`mime_type`
/// for the REST-style facade; the endpoint's MCP response preserves the full array (spec §4.3).
fn first_content_text(result: &Value) -> (Option<String>, Option<String>) {
    let Some(first) = result.get("contents").and_then(Value::as_array).and_then(|a| a.first()) else {
        return (None, None);
    };
    let text = first.get("text").and_then(Value::as_str).map(str::to_string);
    let mime = first.get("mimeType").and_then(Value::as_str).map(str::to_string);
    (text, mime)
}

fn now_epoch_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_content_text_extracts_first_entry() {
        let result = serde_json::json!({
            "contents": [{"uri": "file.txt", "text": "hello", "mimeType": "text/plain"}]
        });
        let (text, mime) = first_content_text(&result);
        assert_eq!(text.as_deref(), Some("hello"));
        assert_eq!(mime.as_deref(), Some("text/plain"));
    }

    #[test]
    fn first_content_text_handles_missing_contents() {
        let (text, mime) = first_content_text(&serde_json::json!({}));
        assert!(text.is_none());
        assert!(mime.is_none());
    }
}
