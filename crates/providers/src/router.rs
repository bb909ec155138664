//! Provider router: selects the correct model provider based on config.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use scholarly_core::error::ProviderError;
use scholarly_core::provider::Provider;

use crate::openai_compat::OpenAiCompatProvider;

/// Providers that run locally and need no API key.
const KEYLESS_PROVIDERS: &[&str] = &["ollama"];

/// Routes model requests to the correct provider.
pub struct ProviderRouter {
    providers: BTreeMap<String, Arc<dyn Provider>>,
    missing_keys: BTreeSet<String>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: BTreeMap::new(),
            missing_keys: BTreeSet::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        let name = name.into();
        self.missing_keys.remove(&name);
        self.providers.insert(name, provider);
    }

    /// Record a provider that is configured but has no credential.
    pub fn mark_missing_key(&mut self, name: impl Into<String>) {
        self.missing_keys.insert(name.into());
    }

    /// Get the default provider.
    pub fn default_provider(&self) -> Result<Arc<dyn Provider>, ProviderError> {
        self.get(&self.default_provider)
    }

    pub fn default_name(&self) -> &str {
        &self.default_provider
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        if let Some(provider) = self.providers.get(name) {
            return Ok(provider.clone());
        }
        if self.missing_keys.contains(name) {
            return Err(ProviderError::NotConfigured(format!(
                "no API key for provider '{name}'; set api_key in the config or one of \
                 SCHOLARLY_API_KEY, GOOGLE_API_KEY, GEMINI_API_KEY, OPENROUTER_API_KEY, OPENAI_API_KEY"
            )));
        }
        Err(ProviderError::NotConfigured(format!(
            "provider '{name}' is not configured"
        )))
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }
}

/// Build providers from configuration.
pub fn build_from_config(config: &scholarly_config::AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone());
        let base_url = provider_config
            .api_url
            .clone()
            .unwrap_or_else(|| default_base_url(name));
        register_one(&mut router, name, &base_url, api_key);
    }

    // Ensure the default provider exists (even if not explicitly configured)
    if !config.providers.contains_key(&config.default_provider) {
        let base_url = default_base_url(&config.default_provider);
        register_one(
            &mut router,
            &config.default_provider,
            &base_url,
            config.api_key.clone(),
        );
    }

    router
}

fn register_one(router: &mut ProviderRouter, name: &str, base_url: &str, api_key: Option<String>) {
    match api_key.filter(|k| !k.is_empty()) {
        Some(key) => router.register(name, Arc::new(OpenAiCompatProvider::new(name, base_url, key))),
        None if KEYLESS_PROVIDERS.contains(&name) => {
            router.register(name, Arc::new(OpenAiCompatProvider::new(name, base_url, name)))
        }
        None => {
            tracing::debug!(provider = %name, "Provider has no API key");
            router.mark_missing_key(name);
        }
    }
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "gemini" | "google" => "https://generativelanguage.googleapis.com/v1beta/openai".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
