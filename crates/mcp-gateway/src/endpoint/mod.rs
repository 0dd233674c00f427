//! Client-facing MCP Streamable HTTP + SSE endpoint (spec §4.4, §6).
//!
//! Grounded on the teacher workspace's `turbomcp-transport::streamable_http_v2`
//! (axum `Router`, SSE-via-`async_stream`, endpoint-event-first framing,
//! `Mcp-Session-Id` header convention) — generalized from its single-session
//! auto-link to the spec's "link the most recently opened still-unlinked SSE
//! connection" rule, and split into session/sse/dispatch submodules instead
//! of one file.

pub mod dispatch;
pub mod session;
pub mod sse;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::GatewaySettings;
use crate::gateway::Gateway;

use self::session::SessionTable;
use self::sse::{OutboundEvent, SseRegistry, IDLE_PING_INTERVAL};

const SERVER_NAME: &str = "mcp-gateway";

#[derive(Clone)]
pub struct EndpointState {
    pub gateway: Arc<Gateway>,
    pub sessions: Arc<SessionTable>,
    pub sse: Arc<SseRegistry>,
    pub settings: GatewaySettings,
    pub log_level: Arc<parking_lot::RwLock<String>>,
}

impl EndpointState {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        let log_level = gateway.settings().log_level.clone();
        Self {
            sessions: Arc::new(SessionTable::new()),
            sse: Arc::new(SseRegistry::new()),
            settings: gateway.settings().clone(),
            log_level: Arc::new(parking_lot::RwLock::new(log_level)),
            gateway,
        }
    }
}

/// Build the router. Canonical path `/mcp` plus the two alias pairs named in
/// spec §6. Unmatched paths — including any `/.well-known/oauth-*`,
/// `/register`, `/authorize`, `/token` — 404 by simple absence of a route.
pub fn router(state: EndpointState) -> Router {
    Router::new()
        .route("/mcp", get(get_canonical).post(post_canonical))
        .route("/sse", get(get_sse_alias))
        .route("/messages", axum::routing::post(post_messages_alias))
        .route("/events", get(get_events_alias))
        .route("/message", axum::routing::post(post_message_alias))
        .with_state(state)
}

async fn get_canonical(State(state): State<EndpointState>, headers: HeaderMap) -> Response {
    open_stream(state, headers, "/mcp").await
}

async fn get_sse_alias(State(state): State<EndpointState>, headers: HeaderMap) -> Response {
    open_stream(state, headers, "/messages").await
}

async fn get_events_alias(State(state): State<EndpointState>, headers: HeaderMap) -> Response {
    open_stream(state, headers, "/message").await
}

async fn post_canonical(State(state): State<EndpointState>, headers: HeaderMap, body: Bytes) -> Response {
    handle_post(state, headers, body).await
}

async fn post_messages_alias(State(state): State<EndpointState>, headers: HeaderMap, body: Bytes) -> Response {
    handle_post(state, headers, body).await
}

async fn post_message_alias(State(state): State<EndpointState>, headers: HeaderMap, body: Bytes) -> Response {
    handle_post(state, headers, body).await
}

/// Drops the SSE connection out of the registry when the stream future is
/// dropped (client disconnect), regardless of which branch ended it.
struct ConnCleanup {
    registry: Arc<SseRegistry>,
    id: String,
}

impl Drop for ConnCleanup {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

/// Bearer-token check, enforced only when `api_key` is configured (spec §9/§11
/// Open Question #1 — the variant's check is ignored unless `API_KEY` is set).
fn authorized(headers: &HeaderMap, settings: &GatewaySettings) -> bool {
    let Some(expected) = &settings.api_key else { return true };
    let Some(header_value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    header_value
        .strip_prefix("Bearer ")
        .is_some_and(|token| token == expected.expose_secret())
}

async fn open_stream(state: EndpointState, headers: HeaderMap, post_url: &str) -> Response {
    if !authorized(&headers, &state.settings) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()).unwrap_or("");
    if !accept.contains("text/event-stream") {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }

    let (conn, mut rx) = state.sse.open();
    let post_url = post_url.to_string();
    let guard = ConnCleanup { registry: state.sse.clone(), id: conn.id.clone() };

    let stream = async_stream::stream! {
        let _guard = guard;

        yield Ok::<Event, axum::Error>(to_sse_event(OutboundEvent::endpoint(post_url)));

        let ready = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/ready",
            "params": { "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") } }
        });
        yield Ok(to_sse_event(OutboundEvent::message(ready)));

        loop {
            match tokio::time::timeout(IDLE_PING_INTERVAL, rx.recv()).await {
                Ok(Some(event)) => yield Ok(to_sse_event(event)),
                Ok(None) => break,
                Err(_) => yield Ok(to_sse_event(OutboundEvent::ping(now_epoch_ms()))),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))).into_response()
}

fn to_sse_event(event: OutboundEvent) -> Event {
    Event::default().event(event.event).data(event.data.to_string())
}

fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

async fn handle_post(state: EndpointState, headers: HeaderMap, body: Bytes) -> Response {
    if !authorized(&headers, &state.settings) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let request: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return bad_request("invalid JSON"),
    };

    let method = request.get("method").and_then(Value::as_str).map(str::to_string);
    let id = request.get("id").cloned();
    let is_notification = id.is_none();
    let session_header = headers
        .get("Mcp-Session-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let Some(method) = method else {
        return bad_request("missing 'method'");
    };

    if method == "initialize" {
        return handle_initialize(&state, &method, id, &request).await;
    }

    if method.starts_with("notifications/") {
        if method == "notifications/initialized" {
            if let Some(session_id) = &session_header {
                if let Some(session) = state.sessions.get(session_id) {
                    session.mark_initialized();
                }
            }
        }
        return StatusCode::ACCEPTED.into_response();
    }

    if is_notification {
        // Acknowledge-and-drop: notifications never surface errors (spec §7).
        let _ = dispatch::handle_method(&state.gateway, &state.log_level, &method, request.get("params").unwrap_or(&Value::Null)).await;
        return StatusCode::ACCEPTED.into_response();
    }

    let session = match &session_header {
        Some(session_id) => match state.sessions.get(session_id) {
            Some(session) => Some(session),
            None => return StatusCode::NOT_FOUND.into_response(),
        },
        None => None,
    };

    let session = match session {
        Some(session) => session,
        None if state.settings.auto_session => state.sessions.create(true),
        None => return StatusCode::NOT_FOUND.into_response(),
    };

    let params = request.get("params").cloned().unwrap_or(Value::Null);
    let outcome = dispatch::handle_method(&state.gateway, &state.log_level, &method, &params).await;
    let envelope = to_envelope(id, outcome);

    route_response(&state, &session.id, envelope)
}

async fn handle_initialize(state: &EndpointState, method: &str, id: Option<Value>, request: &Value) -> Response {
    let session = state.sessions.create(false);
    if let Some(protocol_version) = request
        .get("params")
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str)
    {
        *session.protocol_version.write() = protocol_version.to_string();
    }
    *session.client_info.write() = request.get("params").and_then(|p| p.get("clientInfo")).cloned();

    if let Some(conn) = state.sse.most_recent_unlinked() {
        state.sse.link(&conn.id, &session.id);
    }

    let params = request.get("params").cloned().unwrap_or(Value::Null);
    let outcome = dispatch::handle_method(&state.gateway, &state.log_level, method, &params).await;
    let envelope = to_envelope(id, outcome);

    route_response(state, &session.id, envelope)
}

fn to_envelope(id: Option<Value>, outcome: dispatch::MethodResult) -> Value {
    match outcome {
        Ok(result) => serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err((code, message)) => serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message }
        }),
    }
}

/// Spec §4.4 "Request routing after handshake": prefer the session's own
/// linked SSE connection, fall back to any session-linked connection, else
/// answer the POST inline.
fn route_response(state: &EndpointState, session_id: &str, envelope: Value) -> Response {
    let target = state.sse.linked_to(session_id).or_else(|| state.sse.any_session_linked());

    if let Some(conn) = target {
        let sse = state.sse.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            if !conn.enqueue(OutboundEvent::message(envelope)).await {
                sse.remove(&conn.id);
            }
            debug!(session = %session_id, "routed response via SSE");
        });
        let mut headers = HeaderMap::new();
        headers.insert(
            "Mcp-Session-Id",
            axum::http::HeaderValue::from_str(session_id).unwrap_or_else(|_| axum::http::HeaderValue::from_static("")),
        );
        return (StatusCode::ACCEPTED, headers).into_response();
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        "Mcp-Session-Id",
        axum::http::HeaderValue::from_str(session_id).unwrap_or_else(|_| axum::http::HeaderValue::from_static("")),
    );
    (StatusCode::OK, headers, Json(envelope)).into_response()
}

fn bad_request(message: &str) -> Response {
    warn!(message, "rejecting malformed POST body");
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message }))).into_response()
}
