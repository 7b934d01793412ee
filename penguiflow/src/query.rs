//! Query input types: the immutable request a run is created from, plus the
//! planning hints that bound its execution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifacts::ArtifactRef;

/// Immutable input for one run.
///
/// Attachments are referenced by artifact ids; bytes never travel in the
/// query. `tool_context` and `llm_context` are bounded free-form maps passed
/// through to tools and the model adapter respectively.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Image attachments, already stored as artifacts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ArtifactRef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tool_context: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub llm_context: BTreeMap<String, Value>,
    #[serde(default)]
    pub hints: PlanningHints,
}

impl Query {
    /// Minimal query: text plus session id, everything else default.
    pub fn new(text: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    pub fn with_hints(mut self, hints: PlanningHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_images(mut self, images: Vec<ArtifactRef>) -> Self {
        self.images = images;
        self
    }
}

/// Per-query planning hints; everything is optional and defaults to the
/// runtime limits.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PlanningHints {
    /// Cap on tool calls in flight within one step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_order: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parallel_groups: Vec<Vec<String>>,
    /// Tools the planner must not dispatch this run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disallow_nodes: Vec<String>,
    /// Tools to surface first when listing the catalog.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_nodes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<HopBudget>,
}

/// Hop budget carried in planning hints.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct HopBudget {
    pub max_hops: u32,
}

impl PlanningHints {
    /// Hinted hop budget, when present.
    pub fn max_hops(&self) -> Option<u32> {
        self.budget.map(|b| b.max_hops)
    }
}
