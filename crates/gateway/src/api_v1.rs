//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `POST /v1/chat`: Send a message, get the answer
//! - `POST /v1/chat/stream`: Send a message, get an SSE stream of trace steps
//! - `POST /v1/threads`: Mint a new thread id
//! - `GET  /v1/capabilities`: List registered capabilities and provider reports
//! - `GET  /v1/status`: Initialization status

use std::convert::Infallible;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use futures::Stream;
use scholarly_agent::{InitStatus, SessionCoordinator};
use scholarly_core::message::{HistoryEntry, ThreadId};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::info;

/// Build the v1 router.
pub fn v1_router(coordinator: SessionCoordinator) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/threads", post(new_thread_handler))
        .route("/capabilities", get(capabilities_handler))
        .route("/status", get(status_handler))
        .with_state(coordinator)
}

// ── Types ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Display history; only seeds a thread the server has not seen
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub thread_id: String,
    pub response: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
struct ThreadResponse {
    thread_id: String,
}

#[derive(Debug, Serialize)]
struct CapabilityInfo {
    name: String,
    description: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    initialized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<InitStatus>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(error: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

impl ChatRequest {
    /// Validate the message and resolve (or mint) the thread.
    fn thread(&self, coordinator: &SessionCoordinator) -> Result<ThreadId, ApiError> {
        if self.message.trim().is_empty() {
            return Err(bad_request("message must not be empty"));
        }
        Ok(match self.thread_id.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(id) => ThreadId::from(id),
            None => coordinator.new_thread(),
        })
    }
}

// ── Chat ──────────────────────────────────────────────────────────────────

/// `POST /v1/chat`
async fn chat_handler(
    State(coordinator): State<SessionCoordinator>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let thread_id = payload.thread(&coordinator)?;
    info!(thread_id = %thread_id, message_len = payload.message.len(), "v1/chat request");

    let response = coordinator
        .get_response(&payload.message, &payload.history, &thread_id)
        .await;

    Ok(Json(ChatResponse {
        thread_id: thread_id.to_string(),
        response,
    }))
}

/// `POST /v1/chat/stream`: one `trace` event per step, then a `done` event.
async fn chat_stream_handler(
    State(coordinator): State<SessionCoordinator>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let thread_id = payload.thread(&coordinator)?;
    info!(thread_id = %thread_id, "v1/chat/stream SSE request");

    let (trace, answer) = coordinator
        .get_response_traced(&payload.message, &payload.history, &thread_id)
        .await;

    let steps = UnboundedReceiverStream::new(trace).map(|step| {
        let data = serde_json::to_string(&step).unwrap_or_default();
        Ok(SseEvent::default().event("trace").data(data))
    });

    let thread = thread_id.to_string();
    let done = futures::stream::once(async move {
        let done = ChatResponse {
            thread_id: thread,
            response: answer.await,
        };
        let data = serde_json::to_string(&done).unwrap_or_default();
        Ok(SseEvent::default().event("done").data(data))
    });

    Ok(Sse::new(steps.chain(done)).keep_alive(KeepAlive::default()))
}

// ── Threads, capabilities, status ─────────────────────────────────────────

/// `POST /v1/threads`
async fn new_thread_handler(State(coordinator): State<SessionCoordinator>) -> impl IntoResponse {
    (
        StatusCode::CREATED,
        Json(ThreadResponse {
            thread_id: coordinator.new_thread().to_string(),
        }),
    )
}

/// `GET /v1/capabilities`
async fn capabilities_handler(State(coordinator): State<SessionCoordinator>) -> impl IntoResponse {
    let capabilities: Vec<CapabilityInfo> = coordinator
        .capabilities()
        .await
        .into_iter()
        .map(|d| CapabilityInfo {
            name: d.name,
            description: d.description,
        })
        .collect();
    let providers = coordinator.reports().await;

    Json(serde_json::json!({
        "capabilities": capabilities,
        "providers": providers,
    }))
}

/// `GET /v1/status`
async fn status_handler(State(coordinator): State<SessionCoordinator>) -> Json<StatusResponse> {
    Json(StatusResponse {
        initialized: coordinator.is_initialized().await,
        status: coordinator.status().await,
    })
}
