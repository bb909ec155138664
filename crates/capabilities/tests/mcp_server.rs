//! Exercises the MCP client and loader against an in-process server.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Json;
use scholarly_capabilities::{CapabilityLoader, McpClient};
use scholarly_config::McpServerConfig;
use scholarly_core::capability::CapabilityRegistry;
use scholarly_core::message::InvocationRequest;
use serde_json::{Value, json};

#[derive(Debug, Clone)]
struct Seen {
    method: String,
    session: Option<String>,
    auth: Option<String>,
}

#[derive(Default)]
struct ServerState {
    seen: Mutex<Vec<Seen>>,
}

fn tool(name: &str, description: &str, property: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "title": format!("{name}Arguments"),
            "properties": { property: { "type": "string", "title": "Field" } },
            "required": [property]
        }
    })
}

fn rpc_result(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

async fn handle(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let method = body["method"].as_str().unwrap_or_default().to_string();
    let id = body["id"].clone();
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };
    state.seen.lock().unwrap().push(Seen {
        method: method.clone(),
        session: header_value("mcp-session-id"),
        auth: header_value("authorization"),
    });

    match method.as_str() {
        "initialize" => (
            [("mcp-session-id", "sess-42")],
            Json(rpc_result(
                &id,
                json!({
                    "protocolVersion": "2025-03-26",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "research", "version": "1.0" }
                }),
            )),
        )
            .into_response(),
        "notifications/initialized" => StatusCode::ACCEPTED.into_response(),
        "tools/list" => {
            let page = match body["params"]["cursor"].as_str() {
                None => json!({
                    "tools": [tool("search_papers", "Search scholarly papers", "topic")],
                    "nextCursor": "2"
                }),
                Some(_) => json!({
                    "tools": [tool("explain_paper", "Explain a paper", "paper_url")]
                }),
            };
            Json(rpc_result(&id, page)).into_response()
        }
        "tools/call" => match body["params"]["name"].as_str() {
            Some("explain_paper") => {
                // Streamed reply: a progress notification precedes the response.
                let response = rpc_result(
                    &id,
                    json!({ "content": [{ "type": "text", "text": "MOCK_SUMMARY" }] }),
                );
                let sse = format!(
                    "event: message\ndata: {}\n\nevent: message\ndata: {}\n\n",
                    json!({ "jsonrpc": "2.0", "method": "notifications/progress", "params": { "progress": 1 } }),
                    response
                );
                ([(header::CONTENT_TYPE, "text/event-stream")], sse).into_response()
            }
            Some("search_papers") => Json(rpc_result(
                &id,
                json!({ "content": [{ "type": "text", "text": "rate limited" }], "isError": true }),
            ))
            .into_response(),
            _ => Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32602, "message": "unknown tool" }
            }))
            .into_response(),
        },
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn spawn_server() -> (String, Arc<ServerState>) {
    let state = Arc::new(ServerState::default());
    let app = Router::new()
        .route("/mcp", post(handle))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/mcp"), state)
}

async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/mcp")
}

fn env(name: &str) -> Option<String> {
    (name == "RESEARCH_TOKEN").then(|| "Bearer t0k".to_string())
}

#[tokio::test]
async fn loads_paginated_tools_and_replays_session() {
    let (url, state) = spawn_server().await;
    let mut server = McpServerConfig::new(url);
    server
        .headers
        .insert("Authorization".into(), "${RESEARCH_TOKEN}".into());
    let servers = BTreeMap::from([("research".to_string(), server)]);

    let mut registry = CapabilityRegistry::new();
    let reports = CapabilityLoader::new()
        .with_env(env)
        .load(&mut registry, &servers)
        .await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].registered, 2);
    assert!(reports[0].error.is_none());
    assert_eq!(registry.names(), vec!["explain_paper", "search_papers"]);

    // Unsupported schema keys are gone, property names kept
    let def = &registry.definitions()[0];
    assert!(def.parameters.get("$schema").is_none());
    assert!(def.parameters.get("title").is_none());
    assert!(def.parameters["properties"]["paper_url"].get("title").is_none());
    assert_eq!(registry.resolve("search_papers").unwrap().provider(), "research");

    let seen = state.seen.lock().unwrap().clone();
    let methods: Vec<_> = seen.iter().map(|s| s.method.as_str()).collect();
    assert_eq!(
        methods,
        vec!["initialize", "notifications/initialized", "tools/list", "tools/list"]
    );
    assert!(seen[0].session.is_none());
    assert!(seen[1..].iter().all(|s| s.session.as_deref() == Some("sess-42")));
    assert!(seen.iter().all(|s| s.auth.as_deref() == Some("Bearer t0k")));
}

#[tokio::test]
async fn remote_invocations_map_to_results() {
    let (url, state) = spawn_server().await;
    let servers = BTreeMap::from([("research".to_string(), McpServerConfig::new(url))]);
    let mut registry = CapabilityRegistry::new();
    CapabilityLoader::new().load(&mut registry, &servers).await;

    let ok = registry
        .invoke(&InvocationRequest::new(
            "c1",
            "explain_paper",
            json!({ "paper_url": "https://arxiv.org/abs/1706.03762" }),
        ))
        .await;
    assert!(!ok.is_error);
    assert_eq!(ok.content, "MOCK_SUMMARY");
    assert_eq!(ok.request_id, "c1");

    let failed = registry
        .invoke(&InvocationRequest::new("c2", "search_papers", json!({ "topic": "attention" })))
        .await;
    assert!(failed.is_error);
    assert!(failed.content.contains("rate limited"));

    let seen = state.seen.lock().unwrap();
    let calls: Vec<_> = seen.iter().filter(|s| s.method == "tools/call").collect();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|s| s.session.as_deref() == Some("sess-42")));
}

#[tokio::test]
async fn unreachable_provider_does_not_block_others() {
    let (url, _state) = spawn_server().await;
    let servers = BTreeMap::from([
        ("offline".to_string(), McpServerConfig::new(dead_url().await)),
        ("research".to_string(), McpServerConfig::new(url)),
    ]);

    let mut registry = CapabilityRegistry::new();
    let reports = CapabilityLoader::new().load(&mut registry, &servers).await;

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].provider, "offline");
    assert_eq!(reports[0].registered, 0);
    assert!(reports[0].error.is_some());
    assert_eq!(reports[1].provider, "research");
    assert_eq!(reports[1].registered, 2);
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn colliding_names_are_skipped_not_fatal() {
    let (first, _a) = spawn_server().await;
    let (second, _b) = spawn_server().await;
    let servers = BTreeMap::from([
        ("alpha".to_string(), McpServerConfig::new(first)),
        ("beta".to_string(), McpServerConfig::new(second)),
    ]);

    let mut registry = CapabilityRegistry::new();
    let reports = CapabilityLoader::new().load(&mut registry, &servers).await;

    assert_eq!(reports[0].registered, 2);
    assert_eq!(reports[1].registered, 0);
    assert_eq!(reports[1].skipped, vec!["search_papers", "explain_paper"]);
    assert!(reports[1].error.is_none());
    assert_eq!(registry.resolve("explain_paper").unwrap().provider(), "alpha");
}

/// Issues `sess-1`, `sess-2`, ... and forgets every session but the newest.
#[derive(Default)]
struct RotatingState {
    initializes: AtomicUsize,
}

async fn rotating(
    State(state): State<Arc<RotatingState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let id = body["id"].clone();
    let session = headers
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let current = format!("sess-{}", state.initializes.load(Ordering::SeqCst));

    match body["method"].as_str().unwrap_or_default() {
        "initialize" => {
            let n = state.initializes.fetch_add(1, Ordering::SeqCst) + 1;
            (
                [("mcp-session-id", format!("sess-{n}"))],
                Json(rpc_result(&id, json!({ "protocolVersion": "2025-03-26" }))),
            )
                .into_response()
        }
        _ if session.as_deref() != Some(current.as_str()) => StatusCode::NOT_FOUND.into_response(),
        "notifications/initialized" => StatusCode::ACCEPTED.into_response(),
        "tools/call" if body["params"]["name"] == "always_gone" => {
            StatusCode::NOT_FOUND.into_response()
        }
        "tools/call" => Json(rpc_result(
            &id,
            json!({ "content": [{ "type": "text", "text": format!("answered on {current}") }] }),
        ))
        .into_response(),
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn spawn_rotating_server() -> (String, Arc<RotatingState>) {
    let state = Arc::new(RotatingState::default());
    let app = Router::new()
        .route("/mcp", post(rotating))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/mcp"), state)
}

#[tokio::test]
async fn expired_session_is_renewed_and_retried_once() {
    let (url, state) = spawn_rotating_server().await;
    let client = McpClient::new("research", url, BTreeMap::new());
    client.initialize().await.unwrap();
    assert_eq!(client.session_id().await.as_deref(), Some("sess-1"));

    // Server restarts: sess-1 is forgotten.
    state.initializes.fetch_add(1, Ordering::SeqCst);

    let out = client.call_tool("explain_paper", json!({})).await.unwrap();
    assert_eq!(out.content, "answered on sess-3");
    assert_eq!(client.session_id().await.as_deref(), Some("sess-3"));
    assert_eq!(state.initializes.load(Ordering::SeqCst), 3);

    let again = client.call_tool("explain_paper", json!({})).await.unwrap();
    assert_eq!(again.content, "answered on sess-3");
    assert_eq!(state.initializes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn persistent_404_fails_after_one_renewal() {
    let (url, state) = spawn_rotating_server().await;
    let client = McpClient::new("research", url, BTreeMap::new());
    client.initialize().await.unwrap();

    let err = client.call_tool("always_gone", json!({})).await.unwrap_err();
    assert!(err.to_string().contains("expired"), "got: {err}");
    assert_eq!(state.initializes.load(Ordering::SeqCst), 2);
}
