//! Payload field registry: for each [`EventKind`], the fields a well-formed
//! payload must carry. Validation is write-side only and tolerant by design:
//! extra fields are always accepted so older readers can consume newer logs.

use serde_json::Value;

use crate::event::EventKind;

/// Version tag for the payload shapes below. Bump when a required field is
/// added to any kind.
pub const PAYLOAD_SCHEMA_VERSION: u32 = 1;

/// Required payload fields for the given kind.
pub fn payload_fields(kind: EventKind) -> &'static [&'static str] {
    match kind {
        EventKind::StepStart => &["action_seq", "hops_remaining"],
        EventKind::StepEnd => &["action_seq", "latency_ms"],
        EventKind::ToolCallStart => &["call_id", "tool"],
        EventKind::ToolCallArgs => &["call_id", "args"],
        EventKind::ToolCallEnd => &["call_id", "latency_ms", "ok"],
        EventKind::ToolCallResult => &["call_id", "tool"],
        EventKind::Chunk => &["channel", "text", "done"],
        EventKind::ArtifactChunk => &["stream_id", "seq", "done"],
        EventKind::ArtifactStored => &["id", "mime_type", "size_bytes"],
        EventKind::Thinking => &["text"],
        EventKind::Revision => &["action_seq", "text"],
        EventKind::Pause => &["resume_token", "reason"],
        EventKind::Done => &["answer_action_seq"],
        EventKind::Error => &["class", "message"],
        EventKind::StateUpdate => &["update"],
    }
}

/// Error returned when a payload is missing a required field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissingPayloadField {
    pub kind: EventKind,
    pub field: &'static str,
}

impl std::fmt::Display for MissingPayloadField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} payload missing field `{}`", self.kind, self.field)
    }
}

impl std::error::Error for MissingPayloadField {}

/// Checks that `payload` carries every required field for `kind`.
/// Unknown fields are ignored; a non-object payload fails on the first
/// required field (kinds with no required fields accept anything).
pub fn validate_payload(kind: EventKind, payload: &Value) -> Result<(), MissingPayloadField> {
    for field in payload_fields(kind) {
        if payload.get(field).is_none() {
            return Err(MissingPayloadField { kind, field });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: a complete payload with extra fields validates.
    #[test]
    fn validate_accepts_extra_fields() {
        let payload = json!({"channel": "answer", "text": "hi", "done": false, "phase": "x"});
        assert!(validate_payload(EventKind::Chunk, &payload).is_ok());
    }

    /// **Scenario**: a missing required field names the kind and field.
    #[test]
    fn validate_reports_missing_field() {
        let payload = json!({"channel": "answer", "done": false});
        let err = validate_payload(EventKind::Chunk, &payload).unwrap_err();
        assert_eq!(err.field, "text");
        assert_eq!(err.to_string(), "chunk payload missing field `text`");
    }

    /// **Scenario**: every kind has a registry entry (the match is exhaustive,
    /// so this just pins that no kind requires a field named ambiguously).
    #[test]
    fn registry_fields_are_nonempty_identifiers() {
        for kind in [
            EventKind::StepStart,
            EventKind::Done,
            EventKind::Error,
            EventKind::StateUpdate,
        ] {
            for field in payload_fields(kind) {
                assert!(!field.is_empty());
                assert!(field.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
            }
        }
    }
}
