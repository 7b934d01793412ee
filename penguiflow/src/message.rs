//! Prompt message types for the planner loop.
//!
//! Roles: System (first in the list), User, Assistant, and Observation — the
//! redacted, structured result of a step fed back to the model. Observations
//! carry JSON rather than prose because redaction operates on a typed tree.

use serde_json::Value;

/// A single message in the planner's conversation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Message {
    /// System prompt; typically placed first in the message list.
    System(String),
    /// User input, including steering signals appended mid-run.
    User(String),
    /// Model output (thoughts and answer drafts).
    Assistant(String),
    /// Redacted structured result of one step.
    Observation(Value),
}

impl Message {
    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::System(content.into())
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User(content.into())
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant(content.into())
    }

    /// Creates an observation message.
    pub fn observation(value: Value) -> Self {
        Self::Observation(value)
    }

    /// Text content for text-bearing roles; observations return `None`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::System(s) | Self::User(s) | Self::Assistant(s) => Some(s),
            Self::Observation(_) => None,
        }
    }
}
