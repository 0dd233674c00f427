//! JSON-RPC method dispatch table for the client-facing endpoint (spec §4.4
//! "Method surface").

use serde_json::Value;

use crate::gateway::routing::{ResourceReadRequest, ToolCallRequest};
use crate::gateway::Gateway;
use crate::transport::MCP_PROTOCOL_VERSION;

/// `Ok` carries the JSON-RPC `result` value; `Err` carries `(code, message)`
/// for the caller to wrap as a JSON-RPC `error` object.
pub type MethodResult = Result<Value, (i32, String)>;

pub async fn handle_method(
    gateway: &Gateway,
    log_level: &parking_lot::RwLock<String>,
    method: &str,
    params: &Value,
) -> MethodResult {
    match method {
        "initialize" => Ok(initialize_result()),
        "tools/list" => Ok(tools_list_result(gateway)),
        "tools/call" => tools_call_result(gateway, params).await,
        "resources/list" => Ok(resources_list_result(gateway)),
        "resources/read" => resources_read_result(gateway, params).await,
        "completion/complete" => Ok(serde_json::json!({
            "completion": { "values": [], "total": 0, "hasMore": false }
        })),
        "logging/setLevel" => set_log_level(log_level, params),
        "ping" => Ok(serde_json::json!({})),
        other => Err((-32601, format!("Method not found: {other}"))),
    }
}

fn initialize_result() -> Value {
    serde_json::json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": true },
            "resources": { "listChanged": true },
            "logging": {}
        },
        "serverInfo": {
            "name": "mcp-gateway",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn tools_list_result(gateway: &Gateway) -> Value {
    let tools: Vec<Value> = gateway
        .aggregator()
        .list_tools()
        .into_iter()
        .map(|t| {
            serde_json::json!({
                "name": t.prefixed,
                "description": t.description,
                "inputSchema": t.schema,
            })
        })
        .collect();
    serde_json::json!({ "tools": tools })
}

fn resources_list_result(gateway: &Gateway) -> Value {
    let resources: Vec<Value> = gateway
        .aggregator()
        .list_resources()
        .into_iter()
        .map(|r| {
            serde_json::json!({
                "uri": r.prefixed,
                "name": r.prefixed,
                "description": r.description,
                "mimeType": r.mime_type,
            })
        })
        .collect();
    serde_json::json!({ "resources": resources })
}

async fn tools_call_result(gateway: &Gateway, params: &Value) -> MethodResult {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| (-32602, "missing 'name'".to_string()))?;
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Object(Default::default()));

    let request = ToolCallRequest {
        tool_name: name.to_string(),
        parameters: arguments,
        timeout: None,
    };

    match gateway.execute_tool(request).await {
        Ok(response) if response.success => {
            let text = serde_json::to_string(&response.result.unwrap_or(Value::Null))
                .unwrap_or_else(|_| "null".to_string());
            Ok(serde_json::json!({ "content": [{ "type": "text", "text": text }] }))
        }
        Ok(response) => Ok(serde_json::json!({
            "content": [{ "type": "text", "text": response.error.unwrap_or_default() }],
            "isError": true
        })),
        Err(e) => Err(e.to_jsonrpc()),
    }
}

async fn resources_read_result(gateway: &Gateway, params: &Value) -> MethodResult {
    let uri = params
        .get("uri")
        .and_then(Value::as_str)
        .ok_or_else(|| (-32602, "missing 'uri'".to_string()))?;

    let request = ResourceReadRequest { uri: uri.to_string(), timeout: None };

    match gateway.access_resource(request).await {
        Ok(response) if response.success => Ok(serde_json::json!({
            "contents": [{
                "uri": response.uri,
                "mimeType": response.mime_type,
                "text": response.content.unwrap_or_default(),
            }]
        })),
        Ok(response) => Err((-32000, response.error.unwrap_or_default())),
        Err(e) => Err(e.to_jsonrpc()),
    }
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn set_log_level(log_level: &parking_lot::RwLock<String>, params: &Value) -> MethodResult {
    let level = params
        .get("level")
        .and_then(Value::as_str)
        .ok_or_else(|| (-32602, "missing 'level'".to_string()))?;
    if !VALID_LOG_LEVELS.contains(&level) {
        return Err((-32602, format!("unknown log level '{level}'")));
    }
    *log_level.write() = level.to_string();
    Ok(serde_json::json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewaySettings;

    #[tokio::test]
    async fn unknown_method_returns_method_not_found() {
        let gateway = Gateway::new(GatewaySettings::default());
        let log_level = parking_lot::RwLock::new("info".to_string());
        let result = handle_method(&gateway, &log_level, "bogus/method", &Value::Null).await;
        assert_eq!(result.unwrap_err().0, -32601);
    }

    #[tokio::test]
    async fn ping_returns_empty_object() {
        let gateway = Gateway::new(GatewaySettings::default());
        let log_level = parking_lot::RwLock::new("info".to_string());
        let result = handle_method(&gateway, &log_level, "ping", &Value::Null).await.unwrap();
        assert_eq!(result, serde_json::json!({}));
    }

    #[tokio::test]
    async fn set_log_level_rejects_unknown_level() {
        let gateway = Gateway::new(GatewaySettings::default());
        let log_level = parking_lot::RwLock::new("info".to_string());
        let params = serde_json::json!({ "level": "verbose" });
        let result = handle_method(&gateway, &log_level, "logging/setLevel", &params).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tools_call_missing_name_is_invalid_params() {
        let gateway = Gateway::new(GatewaySettings::default());
        let log_level = parking_lot::RwLock::new("info".to_string());
        let result = handle_method(&gateway, &log_level, "tools/call", &serde_json::json!({})).await;
        assert_eq!(result.unwrap_err().0, -32602);
    }
}
