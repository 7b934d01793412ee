//! Server-sent-event encoder: one named frame per event kind.

use serde_json::Value;

use flow_event::PlannerEvent;

use super::gate::AnswerGate;

/// One SSE frame: `event: <name>\ndata: <json>\n\n`.
#[derive(Clone, Debug, PartialEq)]
pub struct SseFrame {
    pub event: String,
    pub data: Value,
}

impl SseFrame {
    /// Wire encoding of the frame.
    pub fn to_wire(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

/// Stateful SSE encoder for one subscription. Feed bus events in `seq`
/// order; frames come out in the same order with the answer gate applied.
#[derive(Default)]
pub struct SseAdapter {
    gate: AnswerGate,
}

impl SseAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes one bus event into zero or more frames.
    pub fn encode(&mut self, event: PlannerEvent) -> Vec<SseFrame> {
        self.gate
            .admit(event)
            .into_iter()
            .map(frame_for)
            .collect()
    }
}

fn frame_for(event: PlannerEvent) -> SseFrame {
    let mut data = event.payload;
    if let Some(fields) = data.as_object_mut() {
        fields.insert("trace_id".to_string(), Value::String(event.trace_id));
        fields.insert("seq".to_string(), event.seq.into());
    }
    SseFrame {
        event: event.kind.as_str().to_string(),
        data,
    }
}
