//! Error types for the Scholarly domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Scholarly operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Capability errors ---
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    // --- Conversation store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Turn execution errors ---
    #[error("Turn failed: {0}")]
    Turn(#[from] TurnError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Model returned no usable content")]
    EmptyResponse,
}

#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("Capability not found: {0}")]
    NotFound(String),

    #[error("Capability '{name}' is already registered by provider '{existing_provider}'")]
    Conflict {
        name: String,
        existing_provider: String,
    },

    #[error("Capability execution failed: {name}: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Capability timed out: {name} after {timeout_secs}s")]
    Timeout { name: String, timeout_secs: u64 },

    #[error("Invalid capability arguments: {0}")]
    InvalidArguments(String),

    #[error("Capability provider '{provider}' unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Invalid message for thread {thread_id}: {reason}")]
    InvalidMessage { thread_id: String, reason: String },

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Error)]
pub enum TurnError {
    #[error("step limit exceeded after {limit} capability rounds")]
    StepLimitExceeded { limit: u32 },

    #[error("{0}")]
    Provider(#[from] ProviderError),

    #[error("{0}")]
    Store(#[from] StoreError),
}
