//! LLM seam for the planner loop.
//!
//! The planner depends on a callable that reads the conversation plus the
//! visible catalog and returns one structured [`Action`]; this module defines
//! the trait, the model capability profile, and the reflection result type.
//! Concrete provider adapters live outside the runtime; [`MockLlm`] ships for
//! tests and demos.

mod mock;

pub use mock::MockLlm;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::ToolDescriptor;
use crate::message::Message;
use crate::planner::Action;

/// Errors from the model adapter.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider-side failure (network, quota, malformed completion).
    #[error("llm provider: {0}")]
    Provider(String),
    /// The completion did not parse into a valid action.
    #[error("invalid action: {0}")]
    InvalidAction(String),
}

/// Capabilities of the wired model that the planner must respect.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelProfile {
    pub id: String,
    /// Runs carrying image attachments require this.
    pub supports_vision: bool,
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self {
            id: "unspecified".to_string(),
            supports_vision: false,
        }
    }
}

/// Result of one bounded reflection call over an answer draft.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Reflection {
    /// Quality score in `[0, 1]`.
    pub score: f32,
    /// Replacement answer text, when the reflector wants a revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revise: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critique: Option<String>,
}

impl Reflection {
    /// Accepts the draft as-is.
    pub fn accept(score: f32) -> Self {
        Self {
            score,
            revise: None,
            critique: None,
        }
    }

    /// Requests a revision with the given replacement text.
    pub fn revise(score: f32, text: impl Into<String>) -> Self {
        Self {
            score,
            revise: Some(text.into()),
            critique: None,
        }
    }

    pub fn with_critique(mut self, critique: impl Into<String>) -> Self {
        self.critique = Some(critique.into());
        self
    }
}

/// Planner-facing model adapter: one decision per call.
///
/// `decide` reads the conversation (system + user + assistant + observation
/// messages) and the visible tool descriptors, and returns a structurally
/// valid [`Action`]. `reflect` scores an answer draft; the default accepts
/// everything, so non-reflective adapters implement only `decide`.
#[async_trait]
pub trait PlannerLlm: Send + Sync {
    fn profile(&self) -> ModelProfile {
        ModelProfile::default()
    }

    async fn decide(
        &self,
        messages: &[Message],
        tools: &[Arc<ToolDescriptor>],
    ) -> Result<Action, LlmError>;

    async fn reflect(&self, _messages: &[Message], _draft: &str) -> Result<Reflection, LlmError> {
        Ok(Reflection::accept(1.0))
    }
}
