//! Trace steps: ephemeral observability records produced during a turn.

use serde::{Deserialize, Serialize};

/// Preview length for capability arguments.
pub const ARGS_PREVIEW: usize = 100;
/// Preview length for model reasoning fragments.
pub const REASONING_PREVIEW: usize = 200;
/// Preview length for capability results.
pub const RESULT_PREVIEW: usize = 150;
/// Preview length for the user query in turn logs.
pub const QUERY_PREVIEW: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceKind {
    Reasoning,
    Invocation,
    Result,
    Final,
}

impl TraceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceKind::Reasoning => "reasoning",
            TraceKind::Invocation => "invocation",
            TraceKind::Result => "result",
            TraceKind::Final => "final",
        }
    }
}

impl std::fmt::Display for TraceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sub-action of a turn. Not persisted in the thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub kind: TraceKind,
    pub payload: String,
}

impl TraceStep {
    pub fn reasoning(text: &str) -> Self {
        Self {
            kind: TraceKind::Reasoning,
            payload: preview(text, REASONING_PREVIEW),
        }
    }

    pub fn invocation(name: &str, arguments: &serde_json::Value) -> Self {
        Self {
            kind: TraceKind::Invocation,
            payload: format!("{name}({})", preview(&arguments.to_string(), ARGS_PREVIEW)),
        }
    }

    pub fn result(name: &str, content: &str, is_error: bool) -> Self {
        let marker = if is_error { " [error]" } else { "" };
        Self {
            kind: TraceKind::Result,
            payload: format!("{name}{marker}: {}", preview(content, RESULT_PREVIEW)),
        }
    }

    /// The final answer is carried in full.
    pub fn final_answer(text: &str) -> Self {
        Self {
            kind: TraceKind::Final,
            payload: text.to_string(),
        }
    }
}

/// Truncate to at most `max_chars` characters, appending `...` when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
