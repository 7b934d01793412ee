//! Answer gate: suppresses intermediate answer drafts so only the
//! terminating finish's text reaches clients.

use std::collections::BTreeMap;

use flow_event::{EventKind, PlannerEvent};

/// Shared gate logic for both adapters.
///
/// Answer-channel chunks tagged `final` forward immediately. Untagged ones
/// are buffered per `action_seq`; when `done` arrives, only the buffer whose
/// seq equals `done.answer_action_seq` is flushed (in order, ahead of the
/// done event) and every other draft is discarded.
#[derive(Default)]
pub struct AnswerGate {
    buffered: BTreeMap<u64, Vec<PlannerEvent>>,
}

impl AnswerGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one bus event through the gate; returns the events to forward,
    /// in order.
    pub fn admit(&mut self, event: PlannerEvent) -> Vec<PlannerEvent> {
        match event.kind {
            EventKind::Chunk if event.payload["channel"] == "answer" => {
                if event.payload["final"] == true {
                    return vec![event];
                }
                match event.payload.get("action_seq").and_then(|v| v.as_u64()) {
                    Some(seq) => {
                        self.buffered.entry(seq).or_default().push(event);
                        Vec::new()
                    }
                    // Untagged answer chunks never pass the gate.
                    None => Vec::new(),
                }
            }
            EventKind::Done => {
                let mut out = match event.payload.get("answer_action_seq").and_then(|v| v.as_u64())
                {
                    Some(gate) => self.buffered.remove(&gate).unwrap_or_default(),
                    None => Vec::new(),
                };
                self.buffered.clear();
                out.push(event);
                out
            }
            _ => vec![event],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(seq: u64, action_seq: Option<u64>, is_final: bool, text: &str) -> PlannerEvent {
        let mut payload = json!({"channel": "answer", "text": text, "done": false, "final": is_final});
        if let Some(a) = action_seq {
            payload["action_seq"] = a.into();
        }
        PlannerEvent {
            event_id: format!("e{seq}"),
            seq,
            ts_ms: 0,
            trace_id: "tr".into(),
            kind: EventKind::Chunk,
            node: None,
            payload,
        }
    }

    fn done(seq: u64, gate: u64) -> PlannerEvent {
        PlannerEvent {
            event_id: format!("e{seq}"),
            seq,
            ts_ms: 0,
            trace_id: "tr".into(),
            kind: EventKind::Done,
            node: None,
            payload: json!({"answer_action_seq": gate}),
        }
    }

    /// **Scenario**: drafts from a superseded finish are discarded; the
    /// gated finish's chunks flush ahead of done; final-tagged chunks pass
    /// straight through.
    #[test]
    fn gate_flushes_only_the_winning_draft() {
        let mut gate = AnswerGate::new();
        assert!(gate.admit(chunk(0, Some(0), false, "draft")).is_empty());
        assert!(gate.admit(chunk(1, Some(1), false, "revised a")).is_empty());
        assert!(gate.admit(chunk(2, Some(1), false, "revised b")).is_empty());

        let out = gate.admit(done(3, 1));
        let texts: Vec<_> = out
            .iter()
            .filter(|e| e.kind == EventKind::Chunk)
            .map(|e| e.payload["text"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(texts, vec!["revised a", "revised b"]);
        assert_eq!(out.last().unwrap().kind, EventKind::Done);

        let passthrough = gate.admit(chunk(4, Some(2), true, "live"));
        assert_eq!(passthrough.len(), 1);
    }

    /// **Scenario**: an answer chunk without an action_seq never passes.
    #[test]
    fn untagged_answer_chunks_never_pass() {
        let mut gate = AnswerGate::new();
        assert!(gate.admit(chunk(0, None, false, "stray")).is_empty());
        let out = gate.admit(done(1, 0));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, EventKind::Done);
    }

    /// **Scenario**: non-answer events forward untouched.
    #[test]
    fn non_answer_events_forward() {
        let mut gate = AnswerGate::new();
        let thinking = PlannerEvent {
            event_id: "e0".into(),
            seq: 0,
            ts_ms: 0,
            trace_id: "tr".into(),
            kind: EventKind::Thinking,
            node: None,
            payload: json!({"text": "hmm"}),
        };
        assert_eq!(gate.admit(thinking).len(), 1);
    }
}
