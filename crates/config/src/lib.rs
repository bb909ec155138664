//! Configuration loading, validation, and management for Scholarly.
//!
//! Loads configuration from `~/.scholarly/config.toml` (or the path in
//! `SCHOLARLY_CONFIG`) with environment variable overrides. Validates all
//! settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variables that may supply a missing API key, highest priority first.
pub const API_KEY_ENV_VARS: &[&str] = &[
    "SCHOLARLY_API_KEY",
    "GOOGLE_API_KEY",
    "GEMINI_API_KEY",
    "OPENROUTER_API_KEY",
    "OPENAI_API_KEY",
];

/// The root configuration structure.
///
/// Maps directly to `~/.scholarly/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the default provider (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Turn executor settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Conversation store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Remote capability providers
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
}

fn default_provider() -> String {
    "gemini".into()
}
fn default_model() -> String {
    "gemini-2.5-flash".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("agent", &self.agent)
            .field("store", &self.store)
            .field("gateway", &self.gateway)
            .field("providers", &self.providers)
            .field("mcp_servers", &self.mcp_servers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl std::fmt::Debug for McpServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let headers: Vec<&str> = self.headers.keys().map(String::as_str).collect();
        f.debug_struct("McpServerConfig")
            .field("url", &self.url)
            .field("transport", &self.transport)
            .field("headers", &headers)
            .field("enabled", &self.enabled)
            .field("timeout_secs", &self.timeout_secs)
            .field("sanitize_schemas", &self.sanitize_schemas)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum capability rounds per turn
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Ask the model for streamed responses (falls back to single-shot)
    #[serde(default = "default_true")]
    pub streaming: bool,

    /// Replace the built-in research system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_override: Option<String>,

    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,

    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,
}

fn default_max_steps() -> u32 {
    25
}
fn default_search_timeout() -> u64 {
    60
}
fn default_generation_timeout() -> u64 {
    600
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            streaming: true,
            system_prompt_override: None,
            search_timeout_secs: default_search_timeout(),
            generation_timeout_secs: default_generation_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum live threads (0 = unbounded)
    #[serde(default)]
    pub max_threads: usize,

    /// Evict threads idle for longer than this (0 = never)
    #[serde(default)]
    pub idle_ttl_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_threads: 0,
            idle_ttl_secs: 0,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    7860
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

/// Transport used to reach a capability provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpTransport {
    #[default]
    StreamableHttp,
    Sse,
}

impl std::fmt::Display for McpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            McpTransport::StreamableHttp => f.write_str("streamable_http"),
            McpTransport::Sse => f.write_str("sse"),
        }
    }
}

/// A remote capability provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub url: String,

    #[serde(default)]
    pub transport: McpTransport,

    /// Extra request headers; values may reference `${ENV_VAR}`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Timeout override for every capability from this provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Drop schema keys the model client does not accept
    #[serde(default = "default_true")]
    pub sanitize_schemas: bool,
}

impl McpServerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            transport: McpTransport::default(),
            headers: BTreeMap::new(),
            enabled: true,
            timeout_secs: None,
            sanitize_schemas: true,
        }
    }

    /// Headers with `${VAR}` references resolved through `lookup`.
    ///
    /// An unset variable is an error so a missing credential surfaces at
    /// connect time instead of as an opaque 401.
    pub fn resolved_headers(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<BTreeMap<String, String>, ConfigError> {
        self.headers
            .iter()
            .map(|(k, v)| resolve_env_ref(v, &lookup).map(|v| (k.clone(), v)))
            .collect()
    }
}

/// Resolve a `${VAR}` reference; other values pass through unchanged.
pub fn resolve_env_ref(
    value: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    match trimmed
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        Some(var) => lookup(var).ok_or_else(|| {
            ConfigError::ValidationError(format!("environment variable '{var}' is not set"))
        }),
        None => Ok(value.to_string()),
    }
}

impl AppConfig {
    /// Load configuration from the default path.
    ///
    /// Also checks environment variables:
    /// - `SCHOLARLY_CONFIG` overrides the file path
    /// - `SCHOLARLY_API_KEY`, `GOOGLE_API_KEY`, `GEMINI_API_KEY`,
    ///   `OPENROUTER_API_KEY`, `OPENAI_API_KEY` fill a missing key
    /// - `SCHOLARLY_PROVIDER`, `SCHOLARLY_MODEL` override the defaults
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = API_KEY_ENV_VARS
                .iter()
                .find_map(|name| lookup(name).filter(|v| !v.is_empty()));
        }

        if let Some(provider) = lookup("SCHOLARLY_PROVIDER").filter(|v| !v.is_empty()) {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("SCHOLARLY_MODEL").filter(|v| !v.is_empty()) {
            self.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".scholarly")
    }

    /// The config file path, honouring `SCHOLARLY_CONFIG`.
    pub fn config_path() -> PathBuf {
        std::env::var("SCHOLARLY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be at least 1".into(),
            ));
        }

        if self.agent.search_timeout_secs == 0 || self.agent.generation_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent timeouts must be greater than 0".into(),
            ));
        }

        for (name, server) in &self.mcp_servers {
            if server.url.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "mcp_servers.{name}.url must not be empty"
                )));
            }
            if server.timeout_secs == Some(0) {
                return Err(ConfigError::ValidationError(format!(
                    "mcp_servers.{name}.timeout_secs must be greater than 0"
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Enabled capability providers, ordered by name.
    pub fn enabled_servers(&self) -> impl Iterator<Item = (&String, &McpServerConfig)> {
        self.mcp_servers.iter().filter(|(_, s)| s.enabled)
    }

    /// Generate a starter config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let mut config = Self::default();
        config.mcp_servers.insert(
            "research".into(),
            McpServerConfig {
                enabled: false,
                ..McpServerConfig::new("http://localhost:8000/mcp")
            },
        );
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            agent: AgentConfig::default(),
            store: StoreConfig::default(),
            gateway: GatewayConfig::default(),
            providers: BTreeMap::new(),
            mcp_servers: BTreeMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.default_provider, "gemini");
        assert_eq!(config.default_model, "gemini-2.5-flash");
        assert_eq!(config.gateway.port, 7860);
        assert_eq!(config.agent.max_steps, 25);
        assert_eq!(config.store.max_threads, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_provider, config.default_provider);
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.agent.streaming, config.agent.streaming);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_step_limit_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_steps = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_steps"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        let config = result.unwrap();
        assert_eq!(config.default_provider, "gemini");
    }

    #[test]
    fn load_from_file_parses_servers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
default_model = "gemini-2.0-flash"

[agent]
max_steps = 4

[mcp_servers.research]
url = "http://localhost:8000/mcp"
headers = {{ Authorization = "Bearer ${{RESEARCH_TOKEN}}" }}
timeout_secs = 120

[mcp_servers.legacy]
url = "http://localhost:9000/sse"
transport = "sse"
enabled = false
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.default_model, "gemini-2.0-flash");
        assert_eq!(config.agent.max_steps, 4);
        assert_eq!(config.mcp_servers.len(), 2);

        let research = &config.mcp_servers["research"];
        assert_eq!(research.transport, McpTransport::StreamableHttp);
        assert_eq!(research.timeout_secs, Some(120));
        assert!(research.sanitize_schemas);
        assert_eq!(config.mcp_servers["legacy"].transport, McpTransport::Sse);

        let enabled: Vec<_> = config.enabled_servers().map(|(n, _)| n.as_str()).collect();
        assert_eq!(enabled, vec!["research"]);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "default_temperature = \"hot\"").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_fills_missing_api_key_in_priority_order() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(env(&[
            ("OPENAI_API_KEY", "sk-openai"),
            ("GEMINI_API_KEY", "gem-key"),
        ]));
        assert_eq!(config.api_key.as_deref(), Some("gem-key"));
    }

    #[test]
    fn env_does_not_replace_configured_key() {
        let mut config = AppConfig {
            api_key: Some("from-file".into()),
            ..AppConfig::default()
        };
        config.apply_env_overrides(env(&[
            ("SCHOLARLY_API_KEY", "from-env"),
            ("SCHOLARLY_MODEL", "gpt-4o"),
            ("SCHOLARLY_PROVIDER", "openai"),
        ]));
        assert_eq!(config.api_key.as_deref(), Some("from-file"));
        assert_eq!(config.default_model, "gpt-4o");
        assert_eq!(config.default_provider, "openai");
    }

    #[test]
    fn header_references_resolve_from_env() {
        let mut server = McpServerConfig::new("http://localhost:8000/mcp");
        server
            .headers
            .insert("Authorization".into(), "${RESEARCH_TOKEN}".into());
        server.headers.insert("X-Client".into(), "scholarly".into());

        let headers = server
            .resolved_headers(env(&[("RESEARCH_TOKEN", "Bearer abc")]))
            .unwrap();
        assert_eq!(headers["Authorization"], "Bearer abc");
        assert_eq!(headers["X-Client"], "scholarly");

        assert!(server.resolved_headers(env(&[])).is_err());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut config = AppConfig {
            api_key: Some("super-secret".into()),
            ..AppConfig::default()
        };
        let mut server = McpServerConfig::new("http://localhost:8000/mcp");
        server
            .headers
            .insert("Authorization".into(), "Bearer hidden-token".into());
        config.mcp_servers.insert("research".into(), server);

        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("hidden-token"));
        assert!(debug.contains("Authorization"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gemini-2.5-flash"));
        assert!(toml_str.contains("7860"));
        assert!(toml_str.contains("[mcp_servers.research]"));
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert!(parsed.enabled_servers().next().is_none());
    }
}
