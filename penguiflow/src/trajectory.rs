//! Trajectory recorder: append-only per-trace step log.
//!
//! Steps hold only redacted observations and compact side-channel keys; raw
//! tool output never lands here. Indices are assigned at append and are
//! contiguous by construction.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::planner::Action;

/// One planner decision and its observed result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Step {
    /// Position within the trace; `index == len(prior_steps)` at append.
    pub index: usize,
    pub action: Action,
    /// Redacted observation; `None` for non-executing actions (Think, Pause).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<Value>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Step fields before the recorder assigns an index.
#[derive(Clone, Debug)]
pub struct StepDraft {
    pub action: Action,
    pub observation: Option<Value>,
    pub latency_ms: u64,
    pub metadata: BTreeMap<String, Value>,
    pub error: Option<String>,
}

impl StepDraft {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            observation: None,
            latency_ms: 0,
            metadata: BTreeMap::new(),
            error: None,
        }
    }

    pub fn with_observation(mut self, observation: Value) -> Self {
        self.observation = Some(observation);
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Append-only per-trace step log, queryable by trace id.
#[derive(Default)]
pub struct TrajectoryRecorder {
    steps: DashMap<String, Vec<Step>>,
    metadata: DashMap<String, BTreeMap<String, Value>>,
}

impl TrajectoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step, assigning the next contiguous index. Returns the
    /// assigned index.
    pub fn append(&self, trace_id: &str, draft: StepDraft) -> usize {
        let mut entry = self.steps.entry(trace_id.to_string()).or_default();
        let index = entry.len();
        entry.push(Step {
            index,
            action: draft.action,
            observation: draft.observation,
            latency_ms: draft.latency_ms,
            metadata: draft.metadata,
            error: draft.error,
        });
        index
    }

    /// All steps for a trace, in index order. Unknown traces yield an empty
    /// sequence.
    pub fn steps(&self, trace_id: &str) -> Vec<Step> {
        self.steps
            .get(trace_id)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    pub fn len(&self, trace_id: &str) -> usize {
        self.steps.get(trace_id).map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, trace_id: &str) -> bool {
        self.len(trace_id) == 0
    }

    /// Free-form per-trace metadata map.
    pub fn metadata(&self, trace_id: &str) -> BTreeMap<String, Value> {
        self.metadata
            .get(trace_id)
            .map(|m| m.value().clone())
            .unwrap_or_default()
    }

    pub fn set_metadata(&self, trace_id: &str, key: impl Into<String>, value: Value) {
        self.metadata
            .entry(trace_id.to_string())
            .or_default()
            .insert(key.into(), value);
    }
}
