//! Serializable planner state: everything a pause snapshot needs to make a
//! resumed run indistinguishable from one that never paused.

use serde::{Deserialize, Serialize};

use crate::artifacts::ArtifactRef;
use crate::message::Message;
use crate::planner::PlannedCall;
use crate::query::Query;

/// Phases of the planner loop; terminals are `Finished`, `Failed`, `Paused`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerPhase {
    Planning,
    Acting,
    Observing,
    Reflecting,
    Finishing,
    Pausing,
    Finished,
    Failed,
    Paused,
}

impl PlannerPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Paused)
    }
}

/// The loop state. Serialized verbatim into pause records.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlannerState {
    pub trace_id: String,
    pub query: Query,
    pub messages: Vec<Message>,
    pub hops_remaining: u32,
    /// Monotone counter over all actions (step numbering).
    pub next_action_seq: u64,
    /// Monotone counter over answer-bearing finish emissions (the gate).
    pub next_finish_seq: u64,
    pub revisions_done: u32,
    /// Best-so-far answer content for budget-forced finishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_draft: Option<String>,
    /// Tool calls outstanding when the run paused.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_calls: Vec<PlannedCall>,
    /// Image attachments stored up-front; rehydrated by vision-capable
    /// adapters at prompt construction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_refs: Vec<ArtifactRef>,
}

impl PlannerState {
    /// Fresh state for a query: system prompt + user text, hints-derived hop
    /// budget.
    pub fn initial(trace_id: String, query: Query, system_prompt: &str, default_max_hops: u32) -> Self {
        let hops_remaining = query.hints.max_hops().unwrap_or(default_max_hops);
        let image_refs = query.images.clone();
        let messages = vec![
            Message::system(system_prompt),
            Message::user(query.text.clone()),
        ];
        Self {
            trace_id,
            query,
            messages,
            hops_remaining,
            next_action_seq: 0,
            next_finish_seq: 0,
            revisions_done: 0,
            last_draft: None,
            pending_calls: Vec::new(),
            image_refs,
        }
    }

    /// Last assistant text, for budget-forced finishes.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::Assistant(text) => Some(text.as_str()),
            _ => None,
        })
    }
}
