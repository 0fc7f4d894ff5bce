use axum::Router;
use axum::body::{Body, BodyDataStream};
use axum::http::{HeaderName, HeaderValue, Request, StatusCode, header};
use axum_test::TestServer;
use futures::StreamExt;
use mcp_sse_relay::AppState;
use mcp_sse_relay::config::AppConfig;
use mcp_sse_relay::mcp::ToolRegistry;
use mcp_sse_relay::server::build_router;
use mcp_sse_relay::tools::AddTool;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn state() -> AppState {
    let tools = ToolRegistry::new().with_native_tool(Arc::new(AddTool));
    AppState::new(Arc::new(AppConfig::default()), tools)
}

/// One parsed SSE block: either a comment or a named event.
#[derive(Debug, PartialEq)]
enum SseBlock {
    Comment(String),
    Event { event: String, data: String },
}

/// Reassembles SSE blocks from arbitrary body chunking.
struct SseReader {
    body: BodyDataStream,
    buf: String,
}

impl SseReader {
    fn new(body: Body) -> Self {
        Self {
            body: body.into_data_stream(),
            buf: String::new(),
        }
    }

    async fn next_block(&mut self) -> SseBlock {
        loop {
            if let Some(end) = self.buf.find("\n\n") {
                let raw: String = self.buf.drain(..end + 2).collect();
                return parse_block(raw.trim_end());
            }
            let chunk = tokio::time::timeout(Duration::from_secs(5), self.body.next())
                .await
                .expect("timed out waiting for SSE data")
                .expect("stream ended")
                .expect("body error");
            self.buf.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }

    /// Skip keepalive comments until the next named event.
    async fn next_event(&mut self) -> (String, String) {
        loop {
            if let SseBlock::Event { event, data } = self.next_block().await {
                return (event, data);
            }
        }
    }
}

fn parse_block(raw: &str) -> SseBlock {
    let mut event = None;
    let mut data = Vec::new();
    for line in raw.lines() {
        if let Some(comment) = line.strip_prefix(':') {
            return SseBlock::Comment(comment.trim().to_string());
        }
        if let Some(v) = line.strip_prefix("event:") {
            event = Some(v.trim().to_string());
        } else if let Some(v) = line.strip_prefix("data:") {
            data.push(v.trim_start().to_string());
        }
    }
    SseBlock::Event {
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data.join("\n"),
    }
}

async fn open_stream(app: &Router) -> (SseReader, String) {
    let response = app
        .clone()
        .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
    assert_eq!(response.headers()["x-accel-buffering"], "no");

    let mut reader = SseReader::new(response.into_body());
    assert_eq!(
        reader.next_block().await,
        SseBlock::Comment("keepalive".to_string())
    );

    let (event, endpoint) = reader.next_event().await;
    assert_eq!(event, "endpoint");
    let session_id = endpoint
        .strip_prefix("/messages?sessionId=")
        .expect("endpoint carries the session id")
        .to_string();
    (reader, session_id)
}

async fn post(app: &Router, uri: &str, body: &Value) -> StatusCode {
    app.clone()
        .oneshot(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_status_endpoint() {
    let server = TestServer::new(build_router(state())).unwrap();

    let response = server.get("/").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["name"], "mcp-sse-relay");
    assert_eq!(body["endpoints"]["sse"], "/sse");
    assert_eq!(body["endpoints"]["messages"], "/messages");
    assert_eq!(body["active_sessions"], 0);
}

#[tokio::test]
async fn test_debug_echoes_request() {
    let server = TestServer::new(build_router(state())).unwrap();

    let response = server
        .put("/debug")
        .add_query_param("trace", "1")
        .add_header(
            HeaderName::from_static("x-forwarded-for"),
            HeaderValue::from_static("10.1.2.3"),
        )
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["method"], "PUT");
    assert_eq!(body["path"], "/debug");
    assert_eq!(body["query"]["trace"], "1");
    assert_eq!(body["headers"]["x-forwarded-for"], "10.1.2.3");
}

#[tokio::test]
async fn test_post_to_unknown_session_is_rejected() {
    let server = TestServer::new(build_router(state())).unwrap();

    let response = server
        .post("/messages")
        .add_query_param("sessionId", "does-not-exist")
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }))
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "no_active_connection");
    assert!(body["message"].as_str().unwrap().contains("does-not-exist"));
}

#[tokio::test]
async fn test_post_without_any_session_is_rejected() {
    let server = TestServer::new(build_router(state())).unwrap();

    let response = server
        .post("/messages")
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }))
        .await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"], "no_active_connection");
}

#[tokio::test]
async fn test_message_round_trip_over_stream() {
    let state = state();
    let sessions = state.sessions.clone();
    let app = build_router(state);

    let (mut reader, session_id) = open_stream(&app).await;
    assert!(sessions.lookup(&session_id).is_some());

    let uri = format!("/messages?sessionId={session_id}");
    let call = json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "tools/call",
        "params": { "name": "add", "arguments": { "a": 2, "b": 40 } }
    });
    assert_eq!(post(&app, &uri, &call).await, StatusCode::ACCEPTED);

    let (event, data) = reader.next_event().await;
    assert_eq!(event, "message");
    let reply: Value = serde_json::from_str(&data).unwrap();
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["result"]["content"][0]["text"], "42");
    assert_eq!(reply["result"]["isError"], false);
}

#[tokio::test]
async fn test_legacy_query_name_and_unknown_method() {
    let app = build_router(state());
    let (mut reader, session_id) = open_stream(&app).await;

    let uri = format!("/messages?session_id={session_id}");
    let request = json!({ "jsonrpc": "2.0", "id": "x", "method": "resources/list" });
    assert_eq!(post(&app, &uri, &request).await, StatusCode::ACCEPTED);

    let (_, data) = reader.next_event().await;
    let reply: Value = serde_json::from_str(&data).unwrap();
    assert_eq!(reply["id"], "x");
    assert_eq!(reply["error"]["code"], -32601);
}

#[tokio::test]
async fn test_post_without_id_falls_back_to_open_session() {
    let app = build_router(state());
    let (mut reader, _session_id) = open_stream(&app).await;

    let ping = json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" });
    assert_eq!(post(&app, "/messages", &ping).await, StatusCode::ACCEPTED);

    let (event, data) = reader.next_event().await;
    assert_eq!(event, "message");
    assert_eq!(serde_json::from_str::<Value>(&data).unwrap()["id"], 1);
}

#[tokio::test]
async fn test_fallback_delivers_to_exactly_one_session() {
    let app = build_router(state());
    let (mut first, _) = open_stream(&app).await;
    let (mut second, _) = open_stream(&app).await;

    let ping = json!({ "jsonrpc": "2.0", "id": 99, "method": "ping" });
    assert_eq!(post(&app, "/messages", &ping).await, StatusCode::ACCEPTED);

    let got_first = tokio::time::timeout(Duration::from_millis(300), first.next_event()).await;
    let got_second = tokio::time::timeout(Duration::from_millis(300), second.next_event()).await;
    assert_eq!(
        usize::from(got_first.is_ok()) + usize::from(got_second.is_ok()),
        1
    );
}

#[tokio::test]
async fn test_notification_gets_no_reply() {
    let app = build_router(state());
    let (mut reader, session_id) = open_stream(&app).await;
    let uri = format!("/messages?sessionId={session_id}");

    let note = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
    assert_eq!(post(&app, &uri, &note).await, StatusCode::ACCEPTED);
    let ping = json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" });
    assert_eq!(post(&app, &uri, &ping).await, StatusCode::ACCEPTED);

    // The first reply on the stream answers the ping.
    let (_, data) = reader.next_event().await;
    assert_eq!(serde_json::from_str::<Value>(&data).unwrap()["id"], 2);
}

#[tokio::test]
async fn test_malformed_payload_keeps_session_open() {
    let state = state();
    let sessions = state.sessions.clone();
    let app = build_router(state);
    let (_reader, session_id) = open_stream(&app).await;
    let uri = format!("/messages?sessionId={session_id}");

    let status = post(&app, &uri, &json!({ "not": "jsonrpc" })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(sessions.lookup(&session_id).is_some());
}

#[tokio::test]
async fn test_client_disconnect_removes_session() {
    let state = state();
    let sessions = state.sessions.clone();
    let app = build_router(state);

    let (reader, session_id) = open_stream(&app).await;
    assert_eq!(sessions.len(), 1);

    drop(reader);
    assert!(sessions.lookup(&session_id).is_none());
    assert!(sessions.is_empty());

    let uri = format!("/messages?sessionId={session_id}");
    let ping = json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" });
    assert_eq!(post(&app, &uri, &ping).await, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_shutdown_ends_streams() {
    let state = state();
    let lifecycle = state.lifecycle.clone();
    let sessions = state.sessions.clone();
    let app = build_router(state);

    let (mut reader, _) = open_stream(&app).await;
    lifecycle.shutdown();
    assert!(sessions.is_empty());

    let end = tokio::time::timeout(Duration::from_secs(5), reader.body.next())
        .await
        .expect("stream should end after shutdown");
    assert!(end.is_none());
}
