//! MCP client over the streamable HTTP transport.
//!
//! Speaks JSON-RPC 2.0 to a single remote capability provider: one
//! `initialize` handshake, paginated `tools/list`, and `tools/call` per
//! invocation. Responses may come back as plain JSON or as an SSE stream.
//! A 404 on a request carrying a session id means the server dropped the
//! session; the client runs a fresh handshake and retries once.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use scholarly_core::capability::Capability;
use scholarly_core::error::CapabilityError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Protocol revision this client speaks.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

const SESSION_HEADER: &str = "mcp-session-id";
const ACCEPT: &str = "application/json, text/event-stream";
const MAX_PAGES: usize = 100;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// Why one attempt at a request failed.
enum Attempt {
    /// The server no longer knows the session id we sent.
    SessionExpired(String),
    Failed(CapabilityError),
}

impl From<CapabilityError> for Attempt {
    fn from(e: CapabilityError) -> Self {
        Attempt::Failed(e)
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// A tool as advertised by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<RemoteTool>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// What the server reported about itself during `initialize`.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
    pub protocol_version: Option<String>,
}

/// Result of a `tools/call`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallOutput {
    pub content: String,
    pub is_error: bool,
}

/// JSON-RPC client for one streamable-HTTP MCP server.
pub struct McpClient {
    server: String,
    url: String,
    headers: BTreeMap<String, String>,
    http: reqwest::Client,
    session_id: RwLock<Option<String>>,
    reconnect: Mutex<()>,
    next_id: AtomicU64,
}

impl McpClient {
    pub fn new(
        server: impl Into<String>,
        url: impl Into<String>,
        headers: BTreeMap<String, String>,
    ) -> Self {
        // Per-call deadlines are enforced by the registry; only bound the connect.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            server: server.into(),
            url: url.into(),
            headers,
            http,
            session_id: RwLock::new(None),
            reconnect: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    /// Perform the `initialize` handshake followed by `notifications/initialized`.
    pub async fn initialize(&self) -> Result<ServerInfo, CapabilityError> {
        let result = self
            .attempt(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "scholarly",
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                })),
            )
            .await
            .map_err(|a| self.attempt_error("initialize", a))?;

        let info = ServerInfo {
            name: result["serverInfo"]["name"].as_str().map(String::from),
            version: result["serverInfo"]["version"].as_str().map(String::from),
            protocol_version: result["protocolVersion"].as_str().map(String::from),
        };

        self.notify("notifications/initialized", None).await?;

        info!(
            server = %self.server,
            remote = info.name.as_deref().unwrap_or("unknown"),
            protocol = info.protocol_version.as_deref().unwrap_or("unknown"),
            "MCP session initialized"
        );
        Ok(info)
    }

    /// List every tool, following `nextCursor` pagination.
    pub async fn list_tools(&self) -> Result<Vec<RemoteTool>, CapabilityError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.request("tools/list", params).await?;
            let page: ToolsListResult =
                serde_json::from_value(result).map_err(|e| self.unavailable(format!(
                    "failed to parse tools list: {e}"
                )))?;
            tools.extend(page.tools);

            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => return Ok(tools),
            }
        }

        Err(self.unavailable(format!("tools/list did not finish after {MAX_PAGES} pages")))
    }

    /// Invoke a remote tool.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolCallOutput, CapabilityError> {
        let result = self
            .request(
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await?;
        Ok(parse_call_result(&result))
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, CapabilityError> {
        match self.attempt(method, params.clone()).await {
            Ok(result) => Ok(result),
            Err(Attempt::SessionExpired(stale)) => {
                self.renew_session(&stale).await?;
                self.attempt(method, params)
                    .await
                    .map_err(|a| self.attempt_error(method, a))
            }
            Err(Attempt::Failed(e)) => Err(e),
        }
    }

    /// Replace an expired session unless a concurrent caller already did.
    async fn renew_session(&self, stale: &str) -> Result<(), CapabilityError> {
        let _reconnect = self.reconnect.lock().await;
        if self.session_id.read().await.as_deref() != Some(stale) {
            return Ok(());
        }
        warn!(server = %self.server, session = %stale, "MCP session expired, reinitializing");
        *self.session_id.write().await = None;
        self.initialize().await.map(|_| ())
    }

    async fn attempt(&self, method: &str, params: Option<Value>) -> Result<Value, Attempt> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        };

        debug!(server = %self.server, method, id, "MCP request");
        let response = self.post(&body).await?;

        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let text = response
            .text()
            .await
            .map_err(|e| self.unavailable(format!("failed to read {method} response: {e}")))?;

        let rpc = if is_sse {
            find_sse_response(&text, id)
                .ok_or_else(|| self.unavailable(format!("no response to {method} in event stream")))?
        } else {
            serde_json::from_str::<JsonRpcResponse>(&text)
                .map_err(|e| self.unavailable(format!("invalid {method} response: {e}")))?
        };

        if let Some(error) = rpc.error {
            return Err(Attempt::Failed(self.unavailable(format!(
                "{method} failed ({}): {}",
                error.code, error.message
            ))));
        }

        rpc.result
            .ok_or_else(|| Attempt::Failed(self.unavailable(format!("{method} response has no result"))))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), CapabilityError> {
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id: None,
            method,
            params,
        };
        self.post(&body)
            .await
            .map(|_| ())
            .map_err(|a| self.attempt_error(method, a))
    }

    async fn post(&self, body: &JsonRpcRequest<'_>) -> Result<reqwest::Response, Attempt> {
        let mut request = self
            .http
            .post(&self.url)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .json(body);

        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let sent_session = self.session_id.read().await.clone();
        if let Some(session) = sent_session.as_deref() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.unavailable(format!("{} request failed: {e}", body.method)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            if let Some(stale) = sent_session {
                return Err(Attempt::SessionExpired(stale));
            }
        }
        if !response.status().is_success() {
            return Err(Attempt::Failed(self.unavailable(format!(
                "{} failed: HTTP {}",
                body.method,
                response.status()
            ))));
        }

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.write().await;
            if current.as_deref() != Some(session) {
                *current = Some(session.to_string());
            }
        }

        Ok(response)
    }

    fn attempt_error(&self, method: &str, attempt: Attempt) -> CapabilityError {
        match attempt {
            Attempt::Failed(e) => e,
            Attempt::SessionExpired(session) => self.unavailable(format!(
                "{method} failed: session {session} expired"
            )),
        }
    }

    fn unavailable(&self, reason: String) -> CapabilityError {
        CapabilityError::ProviderUnavailable {
            provider: self.server.clone(),
            reason,
        }
    }
}

/// Scan an SSE body for the JSON-RPC response carrying `id`.
fn find_sse_response(body: &str, id: u64) -> Option<JsonRpcResponse> {
    let mut data = String::new();
    let mut events = Vec::new();

    for line in body.lines() {
        if line.is_empty() {
            if !data.is_empty() {
                events.push(std::mem::take(&mut data));
            }
            continue;
        }
        if let Some(chunk) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(chunk.strip_prefix(' ').unwrap_or(chunk));
        }
    }
    if !data.is_empty() {
        events.push(data);
    }

    events
        .iter()
        .filter_map(|event| serde_json::from_str::<JsonRpcResponse>(event).ok())
        .find(|rpc| rpc.id.as_ref().and_then(Value::as_u64) == Some(id))
}

/// Join text content; summarise other content items by type.
fn parse_call_result(result: &Value) -> ToolCallOutput {
    let is_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let parts: Vec<String> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item.get("type").and_then(Value::as_str) {
                    Some("text") => item["text"].as_str().unwrap_or_default().to_string(),
                    Some("resource") => match item["resource"]["text"].as_str() {
                        Some(text) => text.to_string(),
                        None => format!(
                            "[resource: {}]",
                            item["resource"]["uri"].as_str().unwrap_or("unknown")
                        ),
                    },
                    Some(kind) => match item.get("mimeType").and_then(Value::as_str) {
                        Some(mime) => format!("[{kind}: {mime}]"),
                        None => format!("[{kind}]"),
                    },
                    None => item.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let content = if parts.is_empty() {
        result
            .get("structuredContent")
            .map(Value::to_string)
            .unwrap_or_default()
    } else {
        parts.join("\n")
    };

    ToolCallOutput { content, is_error }
}

/// One remote tool exposed as a [`Capability`].
pub struct McpCapability {
    client: Arc<McpClient>,
    name: String,
    description: String,
    schema: Value,
    timeout: Option<Duration>,
}

impl McpCapability {
    pub fn new(client: Arc<McpClient>, tool: RemoteTool, timeout: Option<Duration>) -> Self {
        Self {
            client,
            description: tool.description.unwrap_or_default(),
            name: tool.name,
            schema: tool.input_schema,
            timeout,
        }
    }
}

#[async_trait]
impl Capability for McpCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        self.schema.clone()
    }

    fn provider(&self) -> &str {
        self.client.server()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn invoke(&self, arguments: Value) -> Result<String, CapabilityError> {
        let output = self.client.call_tool(&self.name, arguments).await?;
        if output.is_error {
            return Err(CapabilityError::ExecutionFailed {
                name: self.name.clone(),
                reason: output.content,
            });
        }
        Ok(output.content)
    }
}
