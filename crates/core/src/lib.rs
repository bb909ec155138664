//! # Scholarly Core
//!
//! Domain types, traits, and error definitions for the Scholarly research
//! agent. This crate has **no transport dependencies**: it defines the model
//! that the provider, capability, store, and agent crates implement against.
//!
//! ## Layout
//!
//! - [`message`]: messages, threads, and checkpoints
//! - [`capability`]: the callable-action contract and its registry
//! - [`provider`]: the language-model client contract
//! - [`store`]: the per-thread conversation store contract
//! - [`trace`]: observability records emitted during a turn
//! - [`attachment`]: the in-band base64 document convention

pub mod attachment;
pub mod capability;
pub mod error;
pub mod message;
pub mod provider;
pub mod store;
pub mod trace;

// Re-export key types at crate root for ergonomics
pub use attachment::{Attachment, ExtractedMessage};
pub use capability::{
    Capability, CapabilityClass, CapabilityDefinition, CapabilityRegistry, CapabilityResult,
};
pub use error::{CapabilityError, Error, ProviderError, Result, StoreError, TurnError};
pub use message::{Checkpoint, HistoryEntry, InvocationRequest, Message, Role, Thread, ThreadId};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
pub use store::{ConversationStore, TurnGuard};
pub use trace::{TraceKind, TraceStep};
