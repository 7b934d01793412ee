//! Step observations: the redacted, ordered view of one step's tool results
//! that the planner feeds back to the model.

use serde_json::Value;

use crate::dispatch::CallOutcome;

/// Observation for one executed step. Results appear in the declared call
/// order regardless of completion order.
#[derive(Clone, Debug)]
pub struct StepObservation {
    pub tool_results: Vec<Value>,
    pub parallel: bool,
}

impl StepObservation {
    /// Builds the observation from dispatcher outcomes, preserving their
    /// (declared) order.
    pub fn from_outcomes(outcomes: &[CallOutcome]) -> Self {
        Self {
            tool_results: outcomes.iter().map(CallOutcome::to_result_value).collect(),
            parallel: outcomes.len() > 1,
        }
    }

    /// JSON form appended to the trajectory and to the message history.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "tool_results": self.tool_results,
            "parallel": self.parallel,
        })
    }

    /// True when every result carries an error.
    pub fn all_failed(&self) -> bool {
        !self.tool_results.is_empty()
            && self
                .tool_results
                .iter()
                .all(|r| r.get("error").is_some())
    }
}
