//! Message and Thread domain types.
//!
//! These are the value objects that flow through a turn:
//! the front-end hands over user text, the turn executor appends it to a
//! [`Thread`], the provider answers, capabilities add tool results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attachment;
use crate::provider::Usage;

/// Metadata flag set on tool messages whose invocation failed.
pub const IS_ERROR_KEY: &str = "is_error";

/// Opaque identifier for a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub String);

impl ThreadId {
    /// Mint a fresh thread id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The language model
    Assistant,
    /// Instructions prepended to provider requests; never stored
    System,
    /// A capability result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

/// A capability invocation the model asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Unique within the turn; answered by exactly one tool message
    pub id: String,

    /// Capability name
    pub name: String,

    /// Structured arguments
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl InvocationRequest {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A single message in a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Invocations requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<InvocationRequest>,

    /// If this is a tool result, which invocation it answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Optional metadata (attachments, error flags, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// Create an assistant message that requests capability invocations.
    pub fn assistant_with_calls(
        content: impl Into<String>,
        tool_calls: Vec<InvocationRequest>,
    ) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content.into());
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, content.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Create a tool result message for a failed invocation.
    pub fn tool_error(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::tool_result(tool_call_id, content);
        msg.metadata
            .insert(IS_ERROR_KEY.to_string(), serde_json::Value::Bool(true));
        msg
    }

    /// Whether this tool message reports a failed invocation.
    pub fn is_error(&self) -> bool {
        self.metadata
            .get(IS_ERROR_KEY)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Check that this message may be appended after `prior`.
    ///
    /// System messages are never stored, user messages need content, and a
    /// tool message must answer an earlier, still-unanswered invocation.
    pub fn validate_append(&self, prior: &[Message]) -> Result<(), String> {
        match self.role {
            Role::System => Err("system messages are not stored in a thread".into()),
            Role::User => {
                let has_attachments = self.metadata.contains_key(attachment::METADATA_KEY);
                if self.content.trim().is_empty() && !has_attachments {
                    Err("user message has no content".into())
                } else {
                    Ok(())
                }
            }
            Role::Assistant => Ok(()),
            Role::Tool => {
                let Some(call_id) = self.tool_call_id.as_deref() else {
                    return Err("tool message has no tool_call_id".into());
                };
                let requested = prior.iter().any(|m| {
                    m.role == Role::Assistant && m.tool_calls.iter().any(|c| c.id == call_id)
                });
                if !requested {
                    return Err(format!("tool_call_id '{call_id}' matches no invocation request"));
                }
                let answered = prior
                    .iter()
                    .any(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(call_id));
                if answered {
                    return Err(format!("tool_call_id '{call_id}' was already answered"));
                }
                Ok(())
            }
        }
    }
}

/// Continuation state saved after every completed turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Turns completed on this thread
    pub turns: u64,

    /// Message count when the checkpoint was taken
    pub message_count: usize,

    /// Model that produced the last answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_model: Option<String>,

    /// Cumulative token usage reported by the provider
    #[serde(default)]
    pub usage: Usage,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A thread is an ordered, append-only sequence of messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,

    /// Ordered messages
    pub messages: Vec<Message>,

    pub checkpoint: Checkpoint,

    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    /// Create a new empty thread.
    pub fn new(id: ThreadId) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            checkpoint: Checkpoint::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a message to the thread.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Rough token estimate (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.content.len() / 4).sum()
    }
}

/// One entry of the advisory display history a front-end sends along.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Convert to a storable message; only non-empty user/assistant entries qualify.
    pub fn to_message(&self) -> Option<Message> {
        if self.content.trim().is_empty() {
            return None;
        }
        match self.role {
            Role::User => Some(Message::user(&self.content)),
            Role::Assistant => Some(Message::assistant(&self.content)),
            Role::System | Role::Tool => None,
        }
    }
}
