//! Typed run-event encoder (AG-UI-style): lifecycle-framed events for
//! front-ends that want structured tool and message boundaries.

use serde_json::Value;

use flow_event::{EventKind, PlannerEvent};

use super::gate::AnswerGate;

/// Stateful run-event encoder for one subscription.
///
/// Emits `RUN_STARTED` when attached, wraps gated answer text in
/// `TEXT_MESSAGE_{START,CONTENT,END}`, maps `tool_call_*` one to one, routes
/// non-standard payloads through `CUSTOM{name,value}`, and terminates with
/// `RUN_FINISHED` or `RUN_ERROR`.
pub struct RunEventAdapter {
    gate: AnswerGate,
    started: bool,
    open_message: Option<u64>,
}

impl RunEventAdapter {
    pub fn new() -> Self {
        Self {
            gate: AnswerGate::new(),
            started: false,
            open_message: None,
        }
    }

    /// Encodes one bus event into zero or more typed run events.
    pub fn encode(&mut self, event: PlannerEvent) -> Vec<Value> {
        let mut out = Vec::new();
        if !self.started {
            self.started = true;
            out.push(serde_json::json!({
                "type": "RUN_STARTED",
                "trace_id": event.trace_id.clone(),
            }));
        }
        for admitted in self.gate.admit(event) {
            self.encode_admitted(admitted, &mut out);
        }
        out
    }

    fn encode_admitted(&mut self, event: PlannerEvent, out: &mut Vec<Value>) {
        match event.kind {
            EventKind::Chunk if event.payload["channel"] == "answer" => {
                let seq = event.payload.get("action_seq").and_then(Value::as_u64);
                if self.open_message != seq {
                    self.close_message(out);
                    self.open_message = seq;
                    out.push(serde_json::json!({
                        "type": "TEXT_MESSAGE_START",
                        "message_id": format!("answer-{}", seq.unwrap_or(0)),
                    }));
                }
                out.push(serde_json::json!({
                    "type": "TEXT_MESSAGE_CONTENT",
                    "delta": event.payload["text"],
                }));
                if event.payload["done"] == true {
                    self.close_message(out);
                }
            }
            EventKind::Chunk => {
                // Non-answer channels (thinking/revision text) are custom.
                out.push(custom("chunk", event.payload));
            }
            EventKind::ToolCallStart => out.push(serde_json::json!({
                "type": "TOOL_CALL_START",
                "tool_call_id": event.payload["call_id"],
                "tool": event.payload["tool"],
            })),
            EventKind::ToolCallArgs => out.push(serde_json::json!({
                "type": "TOOL_CALL_ARGS",
                "tool_call_id": event.payload["call_id"],
                "args": event.payload["args"],
            })),
            EventKind::ToolCallEnd => out.push(serde_json::json!({
                "type": "TOOL_CALL_END",
                "tool_call_id": event.payload["call_id"],
                "latency_ms": event.payload["latency_ms"],
                "ok": event.payload["ok"],
            })),
            EventKind::ToolCallResult => out.push(serde_json::json!({
                "type": "TOOL_CALL_RESULT",
                "tool_call_id": event.payload["call_id"],
                "result": event.payload,
            })),
            EventKind::Done => {
                self.close_message(out);
                out.push(serde_json::json!({
                    "type": "RUN_FINISHED",
                    "answer_action_seq": event.payload["answer_action_seq"],
                    "pause": event.payload.get("pause").cloned().unwrap_or(Value::Null),
                }));
            }
            EventKind::Error => {
                self.close_message(out);
                out.push(serde_json::json!({
                    "type": "RUN_ERROR",
                    "class": event.payload["class"],
                    "message": event.payload["message"],
                }));
            }
            EventKind::Thinking
            | EventKind::Revision
            | EventKind::ArtifactChunk
            | EventKind::ArtifactStored
            | EventKind::Pause
            | EventKind::StepStart
            | EventKind::StepEnd
            | EventKind::StateUpdate => {
                out.push(custom(event.kind.as_str(), event.payload));
            }
        }
    }

    fn close_message(&mut self, out: &mut Vec<Value>) {
        if let Some(seq) = self.open_message.take() {
            out.push(serde_json::json!({
                "type": "TEXT_MESSAGE_END",
                "message_id": format!("answer-{seq}"),
            }));
        }
    }
}

impl Default for RunEventAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn custom(name: &str, value: Value) -> Value {
    serde_json::json!({
        "type": "CUSTOM",
        "name": name,
        "value": value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(seq: u64, kind: EventKind, payload: Value) -> PlannerEvent {
        PlannerEvent {
            event_id: format!("e{seq}"),
            seq,
            ts_ms: 0,
            trace_id: "tr".into(),
            kind,
            node: None,
            payload,
        }
    }

    /// **Scenario**: the first event produces RUN_STARTED; tool calls map to
    /// typed events.
    #[test]
    fn run_started_and_tool_calls() {
        let mut adapter = RunEventAdapter::new();
        let out = adapter.encode(event(
            0,
            EventKind::ToolCallStart,
            json!({"call_id": "call_1", "tool": "weather.current"}),
        ));
        assert_eq!(out[0]["type"], "RUN_STARTED");
        assert_eq!(out[1]["type"], "TOOL_CALL_START");
        assert_eq!(out[1]["tool"], "weather.current");
    }

    /// **Scenario**: a final-tagged answer streams as a framed text message
    /// and done closes the run.
    #[test]
    fn final_answer_framed_as_text_message() {
        let mut adapter = RunEventAdapter::new();
        let mut all = Vec::new();
        all.extend(adapter.encode(event(
            0,
            EventKind::Chunk,
            json!({"channel": "answer", "text": "12C ", "done": false, "action_seq": 0, "final": true}),
        )));
        all.extend(adapter.encode(event(
            1,
            EventKind::Chunk,
            json!({"channel": "answer", "text": "cloudy", "done": true, "action_seq": 0, "final": true}),
        )));
        all.extend(adapter.encode(event(2, EventKind::Done, json!({"answer_action_seq": 0}))));

        let types: Vec<_> = all.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(
            types,
            vec![
                "RUN_STARTED",
                "TEXT_MESSAGE_START",
                "TEXT_MESSAGE_CONTENT",
                "TEXT_MESSAGE_CONTENT",
                "TEXT_MESSAGE_END",
                "RUN_FINISHED",
            ]
        );
    }

    /// **Scenario**: a non-final draft is suppressed entirely when done gates
    /// a different action_seq.
    #[test]
    fn suppressed_draft_never_appears() {
        let mut adapter = RunEventAdapter::new();
        let mut all = Vec::new();
        all.extend(adapter.encode(event(
            0,
            EventKind::Chunk,
            json!({"channel": "answer", "text": "draft", "done": true, "action_seq": 0, "final": false}),
        )));
        all.extend(adapter.encode(event(
            1,
            EventKind::Chunk,
            json!({"channel": "answer", "text": "winner", "done": true, "action_seq": 1, "final": false}),
        )));
        all.extend(adapter.encode(event(2, EventKind::Done, json!({"answer_action_seq": 1}))));
        let deltas: Vec<_> = all
            .iter()
            .filter(|e| e["type"] == "TEXT_MESSAGE_CONTENT")
            .map(|e| e["delta"].as_str().unwrap())
            .collect();
        assert_eq!(deltas, vec!["winner"]);
    }

    /// **Scenario**: thinking and pause payloads travel as CUSTOM events.
    #[test]
    fn non_standard_payloads_are_custom() {
        let mut adapter = RunEventAdapter::new();
        let out = adapter.encode(event(0, EventKind::Thinking, json!({"text": "hmm"})));
        assert_eq!(out[1]["type"], "CUSTOM");
        assert_eq!(out[1]["name"], "thinking");
        let out = adapter.encode(event(
            1,
            EventKind::Pause,
            json!({"resume_token": "pfr_x", "reason": "form"}),
        ));
        assert_eq!(out[0]["name"], "pause");
    }
}
