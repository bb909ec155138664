//! Capability trait: the abstraction over actions the agent may invoke.
//!
//! Capabilities come from remote providers (paper search, poster and podcast
//! generation) or from in-process closures. They are registered once at
//! startup in a [`CapabilityRegistry`] and never change afterwards.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CapabilityError;
use crate::message::InvocationRequest;

/// Default timeout for search-class capabilities.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for generation-class capabilities (large media).
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(600);

const GENERATION_KEYWORDS: &[&str] = &[
    "poster", "podcast", "image", "audio", "video", "generate", "render",
];

/// A capability definition as the model sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    pub name: String,

    pub description: String,

    /// JSON Schema describing the arguments
    pub parameters: serde_json::Value,
}

/// The outcome of one invocation, appended to the thread as a tool message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResult {
    /// The invocation request this answers
    pub request_id: String,

    /// Output text, or the error text when `is_error` is set
    pub content: String,

    pub is_error: bool,
}

impl CapabilityResult {
    pub fn ok(request_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(request_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// Rough latency class, used to pick a default timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityClass {
    Search,
    Generation,
}

impl CapabilityClass {
    /// Infer the class from a capability name.
    pub fn infer(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if GENERATION_KEYWORDS.iter().any(|k| lower.contains(k)) {
            CapabilityClass::Generation
        } else {
            CapabilityClass::Search
        }
    }
}

/// The core Capability trait.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Globally unique name (e.g., "search_papers").
    fn name(&self) -> &str;

    /// A description of what this capability does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing the arguments.
    fn input_schema(&self) -> serde_json::Value;

    /// Name of the provider this capability came from.
    fn provider(&self) -> &str {
        "local"
    }

    /// Per-capability timeout override.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    fn class(&self) -> CapabilityClass {
        CapabilityClass::infer(self.name())
    }

    /// Invoke with structured arguments and return the result text.
    async fn invoke(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<String, CapabilityError>;

    /// Convert into a definition for the model.
    fn to_definition(&self) -> CapabilityDefinition {
        CapabilityDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.input_schema(),
        }
    }
}

/// A flat namespace of capabilities merged from every provider.
///
/// Built mutably during startup, then shared read-only behind an `Arc`.
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Arc<dyn Capability>>,
    search_timeout: Duration,
    generation_timeout: Duration,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            capabilities: BTreeMap::new(),
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }

    /// Override the class default timeouts.
    pub fn with_timeouts(mut self, search: Duration, generation: Duration) -> Self {
        self.search_timeout = search;
        self.generation_timeout = generation;
        self
    }

    /// Register a capability. Fails if the name is already taken.
    pub fn insert(
        &mut self,
        capability: Arc<dyn Capability>,
    ) -> std::result::Result<(), CapabilityError> {
        let name = capability.name().to_string();
        if let Some(existing) = self.capabilities.get(&name) {
            return Err(CapabilityError::Conflict {
                name,
                existing_provider: existing.provider().to_string(),
            });
        }
        debug!(capability = %name, provider = %capability.provider(), "Registered capability");
        self.capabilities.insert(name, capability);
        Ok(())
    }

    /// Look up a capability by name.
    pub fn resolve(&self, name: &str) -> std::result::Result<Arc<dyn Capability>, CapabilityError> {
        self.capabilities
            .get(name)
            .cloned()
            .ok_or_else(|| CapabilityError::NotFound(name.to_string()))
    }

    /// All capabilities, ordered by name.
    pub fn all(&self) -> Vec<Arc<dyn Capability>> {
        self.capabilities.values().cloned().collect()
    }

    /// Definitions for the model, ordered by name.
    pub fn definitions(&self) -> Vec<CapabilityDefinition> {
        self.capabilities.values().map(|c| c.to_definition()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.capabilities.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Effective timeout for a capability.
    pub fn timeout_for(&self, capability: &dyn Capability) -> Duration {
        capability.timeout().unwrap_or(match capability.class() {
            CapabilityClass::Search => self.search_timeout,
            CapabilityClass::Generation => self.generation_timeout,
        })
    }

    /// Execute one invocation request.
    ///
    /// Never fails: every error (unknown name, bad arguments, capability
    /// failure, timeout, panic) becomes a result with `is_error` set.
    pub async fn invoke(&self, request: &InvocationRequest) -> CapabilityResult {
        match self.try_invoke(request).await {
            Ok(content) => CapabilityResult::ok(&request.id, content),
            Err(e) => {
                warn!(capability = %request.name, error = %e, "Capability invocation failed");
                CapabilityResult::error(&request.id, format!("Error: {e}"))
            }
        }
    }

    async fn try_invoke(
        &self,
        request: &InvocationRequest,
    ) -> std::result::Result<String, CapabilityError> {
        let capability = self.resolve(&request.name)?;
        let arguments = match &request.arguments {
            serde_json::Value::Null => serde_json::json!({}),
            serde_json::Value::Object(_) => request.arguments.clone(),
            other => {
                return Err(CapabilityError::InvalidArguments(format!(
                    "expected a JSON object for '{}', got {other}",
                    request.name
                )));
            }
        };

        let timeout = self.timeout_for(capability.as_ref());
        let call = AssertUnwindSafe(capability.invoke(arguments)).catch_unwind();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(CapabilityError::ExecutionFailed {
                name: request.name.clone(),
                reason: format!("panicked: {}", panic_message(panic.as_ref())),
            }),
            Err(_) => Err(CapabilityError::Timeout {
                name: request.name.clone(),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
