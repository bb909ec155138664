//! HTTP API gateway for scholarly.
//!
//! Exposes the session coordinator over HTTP: a health check plus the v1
//! chat, thread, capability and status endpoints.
//!
//! Built on Axum.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, header};
use axum::{Router, response::Json, routing::get};
use scholarly_agent::SessionCoordinator;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Request bodies may carry base64 documents.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Build the full router.
///
/// Layers applied:
/// - Request body size limit (8 MB)
/// - CORS for browser front-ends
/// - HTTP trace logging
pub fn build_router(coordinator: SessionCoordinator) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(coordinator))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Serve the gateway on the configured host and port until the process exits.
pub async fn start(coordinator: SessionCoordinator) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!(
        "{}:{}",
        coordinator.config().gateway.host,
        coordinator.config().gateway.port
    );
    let app = build_router(coordinator);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
