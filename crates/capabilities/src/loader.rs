//! Startup loading of remote capability providers.
//!
//! Every enabled server is contacted concurrently; registration then happens
//! in server-name order so collisions resolve deterministically. A failing
//! server contributes zero capabilities and never blocks the others.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use scholarly_config::{McpServerConfig, McpTransport};
use scholarly_core::capability::{Capability, CapabilityRegistry};
use scholarly_core::error::CapabilityError;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::mcp::{McpCapability, McpClient, RemoteTool};
use crate::schema;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Outcome of loading one capability provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderReport {
    pub provider: String,
    /// Capabilities added to the registry
    pub registered: usize,
    /// Capability names not registered because the name was already taken
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
    /// Why the provider contributed nothing, if it failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderReport {
    fn failed(provider: &str, error: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            registered: 0,
            skipped: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Connects to capability providers and fills a [`CapabilityRegistry`].
pub struct CapabilityLoader {
    env: EnvLookup,
    connect_timeout: Duration,
}

impl CapabilityLoader {
    pub fn new() -> Self {
        Self {
            env: Arc::new(|name: &str| std::env::var(name).ok()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Resolve `${VAR}` header references through `lookup` instead of the process env.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        self.env = Arc::new(lookup);
        self
    }

    /// Bound on the handshake plus tool listing for each provider.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Load every enabled server into `registry`, one report per server.
    pub async fn load(
        &self,
        registry: &mut CapabilityRegistry,
        servers: &BTreeMap<String, McpServerConfig>,
    ) -> Vec<ProviderReport> {
        let enabled: Vec<(&String, &McpServerConfig)> =
            servers.iter().filter(|(_, s)| s.enabled).collect();

        let connected = futures::future::join_all(
            enabled
                .iter()
                .map(|(name, server)| self.connect(name, server)),
        )
        .await;

        let mut reports = Vec::with_capacity(enabled.len());
        for ((name, server), outcome) in enabled.into_iter().zip(connected) {
            let report = match outcome {
                Ok((client, tools)) => Self::register(registry, name, server, client, tools),
                Err(e) => {
                    warn!(provider = %name, error = %e, "Capability provider unavailable");
                    ProviderReport::failed(name, e.to_string())
                }
            };
            info!(
                provider = %report.provider,
                registered = report.registered,
                skipped = report.skipped.len(),
                "Loaded capability provider"
            );
            reports.push(report);
        }

        if reports.is_empty() {
            info!("No capability providers configured; model answers without capabilities");
        }
        reports
    }

    async fn connect(
        &self,
        name: &str,
        server: &McpServerConfig,
    ) -> Result<(Arc<McpClient>, Vec<RemoteTool>), CapabilityError> {
        if server.transport != McpTransport::StreamableHttp {
            return Err(CapabilityError::ProviderUnavailable {
                provider: name.to_string(),
                reason: format!(
                    "transport '{}' is not supported; use 'streamable_http'",
                    server.transport
                ),
            });
        }

        let headers = server
            .resolved_headers(|var| (self.env)(var))
            .map_err(|e| CapabilityError::ProviderUnavailable {
                provider: name.to_string(),
                reason: e.to_string(),
            })?;

        let client = Arc::new(McpClient::new(name, &server.url, headers));
        let handshake = async {
            client.initialize().await?;
            client.list_tools().await
        };

        match tokio::time::timeout(self.connect_timeout, handshake).await {
            Ok(Ok(tools)) => Ok((client, tools)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CapabilityError::ProviderUnavailable {
                provider: name.to_string(),
                reason: format!(
                    "no response within {}s",
                    self.connect_timeout.as_secs()
                ),
            }),
        }
    }

    fn register(
        registry: &mut CapabilityRegistry,
        name: &str,
        server: &McpServerConfig,
        client: Arc<McpClient>,
        tools: Vec<RemoteTool>,
    ) -> ProviderReport {
        let timeout = server.timeout_secs.map(Duration::from_secs);
        let mut report = ProviderReport {
            provider: name.to_string(),
            registered: 0,
            skipped: Vec::new(),
            error: None,
        };

        for mut tool in tools {
            if server.sanitize_schemas {
                for path in schema::sanitize(&mut tool.input_schema) {
                    warn!(
                        provider = %name,
                        capability = %tool.name,
                        key = %path,
                        "Dropped unsupported schema key"
                    );
                }
            }

            let capability: Arc<dyn Capability> =
                Arc::new(McpCapability::new(client.clone(), tool, timeout));
            let cap_name = capability.name().to_string();
            match registry.insert(capability) {
                Ok(()) => report.registered += 1,
                Err(e) => {
                    error!(provider = %name, capability = %cap_name, error = %e, "Configuration error: duplicate capability name");
                    report.skipped.push(cap_name);
                }
            }
        }

        report
    }
}

impl Default for CapabilityLoader {
    fn default() -> Self {
        Self::new()
    }
}
