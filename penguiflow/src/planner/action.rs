//! Planner actions: the structured commands the model emits, validated
//! before anything executes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One tool invocation inside a `Plan`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlannedCall {
    /// Stable id for correlating `tool_call_*` events; generated when the
    /// model omits it.
    #[serde(default)]
    pub call_id: String,
    /// Qualified tool name (`ns.local`).
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

impl PlannedCall {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            call_id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            tool: tool.into(),
            args,
        }
    }
}

/// The model's command for one planner iteration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Reasoning attached to the trajectory; nothing executes.
    Think { text: String },
    /// 1..N tool calls executed in one step.
    Plan { parallel: Vec<PlannedCall> },
    /// Terminal answer with a gated stream.
    Finish {
        answer: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        sources: Vec<String>,
    },
    /// Cooperative suspension (OAuth, interactive UI, ...).
    Pause {
        reason: String,
        #[serde(default)]
        payload: Value,
    },
}

/// Structural validation failure for a model-emitted action.
#[derive(Debug, Error)]
#[error("invalid planner action: {0}")]
pub struct ActionParseError(pub String);

impl Action {
    pub fn think(text: impl Into<String>) -> Self {
        Self::Think { text: text.into() }
    }

    pub fn plan(parallel: Vec<PlannedCall>) -> Self {
        Self::Plan { parallel }
    }

    pub fn finish(answer: impl Into<String>) -> Self {
        Self::Finish {
            answer: answer.into(),
            sources: Vec::new(),
        }
    }

    pub fn finish_with_sources(answer: impl Into<String>, sources: Vec<String>) -> Self {
        Self::Finish {
            answer: answer.into(),
            sources,
        }
    }

    pub fn pause(reason: impl Into<String>, payload: Value) -> Self {
        Self::Pause {
            reason: reason.into(),
            payload,
        }
    }

    /// Short name for logging and step metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Think { .. } => "think",
            Self::Plan { .. } => "plan",
            Self::Finish { .. } => "finish",
            Self::Pause { .. } => "pause",
        }
    }

    /// Parses and structurally validates a model-emitted value. Adapters for
    /// real providers funnel completions through this; it fills missing call
    /// ids and rejects empty plans.
    pub fn from_value(value: Value) -> Result<Self, ActionParseError> {
        let mut action: Action =
            serde_json::from_value(value).map_err(|e| ActionParseError(e.to_string()))?;
        match &mut action {
            Action::Plan { parallel } => {
                if parallel.is_empty() {
                    return Err(ActionParseError("plan requires at least one call".into()));
                }
                for call in parallel.iter_mut() {
                    if call.tool.is_empty() {
                        return Err(ActionParseError("plan call is missing a tool name".into()));
                    }
                    if call.call_id.is_empty() {
                        call.call_id = format!("call_{}", uuid::Uuid::new_v4().simple());
                    }
                }
            }
            Action::Finish { answer, .. } => {
                if answer.is_empty() {
                    return Err(ActionParseError("finish requires answer text".into()));
                }
            }
            Action::Think { text } => {
                if text.is_empty() {
                    return Err(ActionParseError("think requires text".into()));
                }
            }
            Action::Pause { reason, .. } => {
                if reason.is_empty() {
                    return Err(ActionParseError("pause requires a reason".into()));
                }
            }
        }
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: a plan parses from the wire shape, gets call ids filled,
    /// and round-trips.
    #[test]
    fn plan_parses_and_fills_call_ids() {
        let action = Action::from_value(json!({
            "action": "plan",
            "parallel": [
                {"tool": "weather.current", "args": {"city": "paris"}},
                {"call_id": "call_fixed", "tool": "news.top", "args": {}}
            ]
        }))
        .unwrap();
        match &action {
            Action::Plan { parallel } => {
                assert_eq!(parallel.len(), 2);
                assert!(parallel[0].call_id.starts_with("call_"));
                assert_eq!(parallel[1].call_id, "call_fixed");
            }
            other => panic!("expected plan, got {other:?}"),
        }
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["action"], "plan");
    }

    /// **Scenario**: structurally invalid actions are rejected with a reason.
    #[test]
    fn invalid_actions_rejected() {
        assert!(Action::from_value(json!({"action": "plan", "parallel": []})).is_err());
        assert!(Action::from_value(json!({"action": "finish", "answer": ""})).is_err());
        assert!(Action::from_value(json!({"action": "warp"})).is_err());
        assert!(Action::from_value(json!({"action": "pause", "reason": ""})).is_err());
    }

    /// **Scenario**: every variant serde round-trips (actions live inside
    /// trajectory steps and pause snapshots).
    #[test]
    fn actions_round_trip() {
        for action in [
            Action::think("need the weather"),
            Action::plan(vec![PlannedCall::new("weather.current", json!({"city": "paris"}))]),
            Action::finish_with_sources("cloudy, 12C", vec!["weather.current".into()]),
            Action::pause("awaiting oauth", json!({"provider": "calendar"})),
        ] {
            let value = serde_json::to_value(&action).unwrap();
            let back: Action = serde_json::from_value(value).unwrap();
            assert_eq!(back, action);
        }
    }
}
