//! Mock model for tests and examples: a scripted queue of actions and
//! reflections, consumed one per call.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::catalog::ToolDescriptor;
use crate::message::Message;
use crate::planner::{Action, PlannedCall};

use super::{LlmError, ModelProfile, PlannerLlm, Reflection};

/// Scripted mock: `decide` pops the next action, `reflect` pops the next
/// reflection (accepting when the script is empty). An exhausted action
/// script is a provider error so runaway loops fail loudly in tests.
pub struct MockLlm {
    actions: Mutex<VecDeque<Action>>,
    reflections: Mutex<VecDeque<Reflection>>,
    profile: ModelProfile,
}

impl MockLlm {
    /// Mock that replays `actions` in order.
    pub fn scripted(actions: Vec<Action>) -> Self {
        Self {
            actions: Mutex::new(actions.into()),
            reflections: Mutex::new(VecDeque::new()),
            profile: ModelProfile {
                id: "mock".to_string(),
                supports_vision: false,
            },
        }
    }

    /// Single terminating answer, no tools.
    pub fn finish_with(answer: impl Into<String>) -> Self {
        Self::scripted(vec![Action::finish(answer)])
    }

    /// One plan step followed by a finish; the common two-round loop.
    pub fn plan_then_finish(calls: Vec<PlannedCall>, answer: impl Into<String>) -> Self {
        Self::scripted(vec![Action::plan(calls), Action::finish(answer)])
    }

    /// Queues reflections consumed by `reflect` in order.
    pub fn with_reflections(self, reflections: Vec<Reflection>) -> Self {
        *self.reflections.lock().expect("mock lock") = reflections.into();
        self
    }

    pub fn with_profile(mut self, profile: ModelProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Marks the mock vision-capable.
    pub fn with_vision(mut self) -> Self {
        self.profile.supports_vision = true;
        self
    }
}

#[async_trait]
impl PlannerLlm for MockLlm {
    fn profile(&self) -> ModelProfile {
        self.profile.clone()
    }

    async fn decide(
        &self,
        _messages: &[Message],
        _tools: &[Arc<ToolDescriptor>],
    ) -> Result<Action, LlmError> {
        self.actions
            .lock()
            .expect("mock lock")
            .pop_front()
            .ok_or_else(|| LlmError::Provider("mock action script exhausted".to_string()))
    }

    async fn reflect(&self, _messages: &[Message], _draft: &str) -> Result<Reflection, LlmError> {
        Ok(self
            .reflections
            .lock()
            .expect("mock lock")
            .pop_front()
            .unwrap_or_else(|| Reflection::accept(1.0)))
    }
}
