//! Event record types: kind + envelope fields + JSON payload.
//! The bus serializes one record per emitted event; `(trace_id, seq)` is the
//! total order within a trace.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a trace event. The set is fixed; payload shapes per kind are
/// described by the registry in [`crate::payload_fields`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StepStart,
    StepEnd,
    ToolCallStart,
    ToolCallArgs,
    ToolCallEnd,
    ToolCallResult,
    Chunk,
    ArtifactChunk,
    ArtifactStored,
    Thinking,
    Revision,
    Pause,
    Done,
    Error,
    StateUpdate,
}

impl EventKind {
    /// Wire name of the kind (snake_case), as used for SSE event names and
    /// persisted records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StepStart => "step_start",
            Self::StepEnd => "step_end",
            Self::ToolCallStart => "tool_call_start",
            Self::ToolCallArgs => "tool_call_args",
            Self::ToolCallEnd => "tool_call_end",
            Self::ToolCallResult => "tool_call_result",
            Self::Chunk => "chunk",
            Self::ArtifactChunk => "artifact_chunk",
            Self::ArtifactStored => "artifact_stored",
            Self::Thinking => "thinking",
            Self::Revision => "revision",
            Self::Pause => "pause",
            Self::Done => "done",
            Self::Error => "error",
            Self::StateUpdate => "state_update",
        }
    }

    /// Lossy kinds may be dropped for a lagging subscriber; everything else is
    /// preserved (the producer waits for buffer space instead).
    pub fn is_lossy(&self) -> bool {
        matches!(self, Self::Chunk | Self::ArtifactChunk | Self::Thinking)
    }

    /// Terminal kinds close a trace stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record of a trace's event log.
///
/// Invariants (enforced by the producing bus, relied on by consumers):
/// `seq` is contiguous from 0 within `trace_id`; `event_id` is globally
/// unique; records are delivered to any subscriber in `seq` order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlannerEvent {
    /// Globally unique id for this record (uuid).
    pub event_id: String,
    /// Position within the trace, starting at 0.
    pub seq: u64,
    /// Wall-clock milliseconds since the Unix epoch.
    pub ts_ms: i64,
    /// Trace this record belongs to.
    pub trace_id: String,
    /// Event kind; selects the payload shape.
    pub kind: EventKind,
    /// Producing node, when one applies (e.g. a tool's qualified name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// Kind-specific payload. Unknown fields are tolerated on read.
    pub payload: Value,
}

impl PlannerEvent {
    /// Serializes this record to a JSON object.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
