//! End-to-end client-facing endpoint scenario (spec §8): POST `/mcp`
//! through the handshake and a real tool call, driven in-process via
//! `tower::ServiceExt::oneshot` against the axum `Router` — no network
//! socket needed.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use mcp_gateway::config::GatewaySettings;
use mcp_gateway::endpoint::{self, EndpointState};
use mcp_gateway::gateway::Gateway;

use common::{env_with, fake_upstream_config};

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Pull the next SSE frame's `data:` payload out of the streaming body.
async fn next_sse_payload(body: &mut Body) -> String {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
            .await
            .expect("SSE stream produced a frame before the deadline")
            .expect("stream ended unexpectedly")
            .expect("frame read error");
        let Some(data) = frame.into_data().ok() else { continue };
        let text = String::from_utf8(data.to_vec()).unwrap();
        if let Some(payload) = text.lines().find_map(|l| l.strip_prefix("data: ")) {
            return payload.to_string();
        }
    }
}

fn json_request(path: &str, session_id: Option<&str>, payload: serde_json::Value) -> Request<Body> {
    let mut builder = Request::post(path).header(header::CONTENT_TYPE, "application/json");
    if let Some(id) = session_id {
        builder = builder.header("Mcp-Session-Id", id);
    }
    builder.body(Body::from(payload.to_string())).unwrap()
}

#[tokio::test]
async fn handshake_then_tool_call_over_http() {
    let gateway = Gateway::new(GatewaySettings::default());
    let mut configs = HashMap::new();
    configs.insert(
        "alpha".to_string(),
        fake_upstream_config("alpha", env_with(&[("FAKE_TOOL_NAME", "search"), ("FAKE_TOOL_TEXT", "hello-http")])),
    );
    gateway.load_upstreams(configs);
    gateway.enable_upstream("alpha").await.unwrap();

    let router = endpoint::router(EndpointState::new(gateway.clone()));

    let init_request = json_request(
        "/mcp",
        None,
        serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {"protocolVersion": "2025-03-26"}}),
    );
    let response = router.clone().oneshot(init_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session_id = response
        .headers()
        .get("Mcp-Session-Id")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    let envelope = body_json(response).await;
    assert_eq!(envelope["result"]["serverInfo"]["name"], "mcp-gateway");

    let initialized_request = json_request(
        "/mcp",
        Some(&session_id),
        serde_json::json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
    );
    let response = router.clone().oneshot(initialized_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let call_request = json_request(
        "/mcp",
        Some(&session_id),
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {"name": "alpha.search", "arguments": {}}
        }),
    );
    let response = router.clone().oneshot(call_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let envelope = body_json(response).await;
    let text = envelope["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("hello-http"));

    gateway.disable_upstream("alpha").await.unwrap();
}

#[tokio::test]
async fn sse_connection_links_and_carries_the_response() {
    let gateway = Gateway::new(GatewaySettings::default());
    let router = endpoint::router(EndpointState::new(gateway));

    let sse_request = Request::get("/mcp")
        .header(header::ACCEPT, "text/event-stream")
        .body(Body::empty())
        .unwrap();
    let sse_response = router.clone().oneshot(sse_request).await.unwrap();
    assert_eq!(sse_response.status(), StatusCode::OK);
    let mut sse_body = sse_response.into_body();

    // First frame is the `endpoint` event naming the POST url, second is
    // the `notifications/ready` message — drain both before initializing.
    let _endpoint_event = next_sse_payload(&mut sse_body).await;
    let ready_event = next_sse_payload(&mut sse_body).await;
    assert!(ready_event.contains("notifications/ready"));

    let init_request = json_request(
        "/mcp",
        None,
        serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
    );
    let init_response = router.oneshot(init_request).await.unwrap();
    // Routed via the now-linked SSE connection instead of answered inline.
    assert_eq!(init_response.status(), StatusCode::ACCEPTED);

    let routed = next_sse_payload(&mut sse_body).await;
    let envelope: serde_json::Value = serde_json::from_str(&routed).unwrap();
    assert_eq!(envelope["result"]["serverInfo"]["name"], "mcp-gateway");
}

#[tokio::test]
async fn bearer_token_is_enforced_when_configured() {
    let mut settings = GatewaySettings::default();
    settings.api_key = Some("super-secret".to_string().into());
    let gateway = Gateway::new(settings);
    let router = endpoint::router(EndpointState::new(gateway));

    let unauthenticated = json_request(
        "/mcp",
        None,
        serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
    );
    let response = router.clone().oneshot(unauthenticated).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut authenticated = json_request(
        "/mcp",
        None,
        serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
    );
    authenticated
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer super-secret".parse().unwrap());
    let response = router.oneshot(authenticated).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
