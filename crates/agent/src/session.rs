//! Session coordinator: the single entry point front-ends talk to.
//!
//! Owns startup (model client, capability loading, store) and schedules
//! every request as its own task on the runtime captured at construction.
//! Every outcome, including failures, comes back as text.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use scholarly_capabilities::{CapabilityLoader, ProviderReport};
use scholarly_config::AppConfig;
use scholarly_core::attachment::{self, METADATA_KEY};
use scholarly_core::capability::{Capability, CapabilityDefinition, CapabilityRegistry};
use scholarly_core::error::TurnError;
use scholarly_core::message::{HistoryEntry, Message, ThreadId};
use scholarly_core::provider::Provider;
use scholarly_core::store::ConversationStore;
use scholarly_core::trace::TraceStep;
use scholarly_store::InMemoryStore;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{error, info, warn};

use crate::turn::{TurnExecutor, TurnOutcome};

/// Returned for every request made before a successful [`SessionCoordinator::initialize`].
pub const NOT_INITIALIZED: &str = "Error: Agent not initialized";

/// Result of [`SessionCoordinator::initialize`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitStatus {
    pub ok: bool,
    pub message: String,
}

struct Inner {
    config: AppConfig,
    runtime: Option<Handle>,
    executor: RwLock<Option<Arc<TurnExecutor>>>,
    reports: RwLock<Vec<ProviderReport>>,
    status: RwLock<Option<InitStatus>>,
    init_lock: Mutex<()>,
}

/// Cheaply cloneable handle to the agent.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    /// Create an uninitialized coordinator bound to the current Tokio runtime, if any.
    pub fn new(config: AppConfig) -> Self {
        Self::with_runtime(config, Handle::try_current().ok())
    }

    /// Create a coordinator that schedules requests on `runtime`.
    pub fn with_runtime(config: AppConfig, runtime: Option<Handle>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                runtime,
                executor: RwLock::new(None),
                reports: RwLock::new(Vec::new()),
                status: RwLock::new(None),
                init_lock: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    /// Resolve the model client from config, load capabilities, build the executor.
    pub async fn initialize(&self) -> InitStatus {
        let router = scholarly_providers::build_from_config(&self.inner.config);
        match router.default_provider() {
            Ok(provider) => self.initialize_with(provider, Vec::new()).await,
            Err(e) => {
                error!(error = %e, "Failed to construct model client");
                self.record(InitStatus {
                    ok: false,
                    message: format!("Failed to initialize agent: {e}"),
                })
                .await
            }
        }
    }

    /// Initialize with an explicit model client and in-process capabilities.
    ///
    /// `local` capabilities are registered before the configured remote providers.
    pub async fn initialize_with(
        &self,
        provider: Arc<dyn Provider>,
        local: Vec<Arc<dyn Capability>>,
    ) -> InitStatus {
        let _init = self.inner.init_lock.lock().await;
        if self.inner.executor.read().await.is_some() {
            return InitStatus {
                ok: true,
                message: "Agent already initialized".into(),
            };
        }

        let config = &self.inner.config;
        let mut registry = CapabilityRegistry::new().with_timeouts(
            Duration::from_secs(config.agent.search_timeout_secs),
            Duration::from_secs(config.agent.generation_timeout_secs),
        );

        for capability in local {
            let name = capability.name().to_string();
            if let Err(e) = registry.insert(capability) {
                error!(capability = %name, error = %e, "Configuration error: duplicate capability name");
            }
        }

        let reports = CapabilityLoader::new()
            .load(&mut registry, &config.mcp_servers)
            .await;

        let store = Arc::new(InMemoryStore::from_config(&config.store));
        if config.store.idle_ttl_secs > 0 {
            store.spawn_sweeper(Duration::from_secs(config.store.sweep_interval_secs.max(1)));
        }

        let capability_count = registry.len();
        let executor = TurnExecutor::from_config(
            provider,
            Arc::new(registry),
            store as Arc<dyn ConversationStore>,
            config,
        );
        info!(
            provider = executor.provider_name(),
            model = executor.model(),
            capabilities = capability_count,
            "Agent initialized"
        );

        let mut message = format!(
            "Agent initialized with {capability_count} capabilities from {} providers",
            reports.iter().filter(|r| r.error.is_none()).count()
        );
        let failed: Vec<String> = reports
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| format!("{} ({e})", r.provider)))
            .collect();
        if !failed.is_empty() {
            message.push_str(&format!("; unavailable: {}", failed.join(", ")));
        }

        *self.inner.executor.write().await = Some(Arc::new(executor));
        *self.inner.reports.write().await = reports;
        self.record(InitStatus { ok: true, message }).await
    }

    async fn record(&self, status: InitStatus) -> InitStatus {
        *self.inner.status.write().await = Some(status.clone());
        status
    }

    /// The last initialization outcome, if `initialize` ran.
    pub async fn status(&self) -> Option<InitStatus> {
        self.inner.status.read().await.clone()
    }

    pub async fn is_initialized(&self) -> bool {
        self.inner.executor.read().await.is_some()
    }

    /// Per-provider load reports from initialization.
    pub async fn reports(&self) -> Vec<ProviderReport> {
        self.inner.reports.read().await.clone()
    }

    /// Capabilities the model can use; empty before initialization.
    pub async fn capabilities(&self) -> Vec<CapabilityDefinition> {
        match self.inner.executor.read().await.as_ref() {
            Some(executor) => executor.registry().definitions(),
            None => Vec::new(),
        }
    }

    /// Mint an id for a fresh conversation. The old thread is left intact.
    pub fn new_thread(&self) -> ThreadId {
        ThreadId::new()
    }

    /// Answer `message` on `thread_id`.
    pub async fn get_response(
        &self,
        message: &str,
        history: &[HistoryEntry],
        thread_id: &ThreadId,
    ) -> String {
        let (_trace, answer) = self.respond(message, history, thread_id, false).await;
        answer.await
    }

    /// Like [`get_response`](Self::get_response), with a live trace of the turn.
    ///
    /// The receiver closes when the turn ends.
    pub async fn get_response_traced(
        &self,
        message: &str,
        history: &[HistoryEntry],
        thread_id: &ThreadId,
    ) -> (mpsc::UnboundedReceiver<TraceStep>, BoxFuture<'static, String>) {
        self.respond(message, history, thread_id, true).await
    }

    async fn respond(
        &self,
        message: &str,
        history: &[HistoryEntry],
        thread_id: &ThreadId,
        live: bool,
    ) -> (mpsc::UnboundedReceiver<TraceStep>, BoxFuture<'static, String>) {
        let (tx, rx) = mpsc::unbounded_channel();

        if message.trim().is_empty() {
            return (rx, futures::future::ready(String::new()).boxed());
        }
        let Some(executor) = self.inner.executor.read().await.clone() else {
            return (rx, futures::future::ready(NOT_INITIALIZED.to_string()).boxed());
        };

        let user_message = build_user_message(message);
        let history = history.to_vec();
        let thread_id = thread_id.clone();
        let trace_tx = live.then_some(tx);

        let task = async move {
            executor
                .run_seeded(&thread_id, &history, user_message, trace_tx)
                .await
        };
        let handle = match &self.inner.runtime {
            Some(runtime) => runtime.spawn(task),
            None => tokio::spawn(task),
        };

        let answer = async move {
            match handle.await {
                Ok(outcome) => answer_text(outcome),
                Err(e) => {
                    error!(error = %e, "Turn task failed");
                    format!("Error: {e}")
                }
            }
        };
        (rx, answer.boxed())
    }
}

fn answer_text(outcome: Result<TurnOutcome, TurnError>) -> String {
    match outcome {
        Ok(outcome) => outcome.answer,
        Err(e) => {
            warn!(error = %e, "Turn failed");
            format!("Error: {e}")
        }
    }
}

/// Split in-band attachments out of the text into message metadata.
fn build_user_message(input: &str) -> Message {
    let extracted = attachment::extract(input);
    for reason in &extracted.malformed {
        warn!(reason = %reason, "Dropped malformed attachment block");
    }

    let mut message = Message::user(&extracted.text);
    if !extracted.attachments.is_empty() {
        match serde_json::to_value(extracted.records()) {
            Ok(records) => {
                message.metadata.insert(METADATA_KEY.to_string(), records);
            }
            Err(e) => warn!(error = %e, "Failed to record attachments"),
        }
    }
    message
}
