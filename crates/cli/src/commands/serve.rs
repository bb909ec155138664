//! `scholarly serve`: Start the HTTP gateway.

use scholarly_agent::SessionCoordinator;
use scholarly_config::AppConfig;
use tracing::{info, warn};

pub async fn run(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(p) = port {
        config.gateway.port = p;
    }

    info!(
        host = %config.gateway.host,
        port = config.gateway.port,
        "Starting gateway"
    );

    let coordinator = SessionCoordinator::new(config);
    let status = coordinator.initialize().await;
    if status.ok {
        info!(message = %status.message, "Agent ready");
    } else {
        // Keep serving: /v1/status reports the failure and chat replies say so.
        warn!(message = %status.message, "Agent failed to initialize");
    }

    scholarly_gateway::start(coordinator).await
}
