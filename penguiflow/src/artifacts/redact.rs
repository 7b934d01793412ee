//! Artifact redaction: replaces artifact-bearing fields in a tool's output
//! with compact placeholders before the value can reach model context.
//!
//! Two triggers: fields the output schema marks with `x-artifact`, and string
//! values that begin with a known base64 magic prefix (binary smuggled as
//! text). Originals move to a side-channel map keyed by JSON path so lateral
//! consumers can retrieve them without a model round-trip.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::registry::{SchemaKind, ValueSchema};

/// Base64 magic prefixes treated as artifact-bearing regardless of schema.
const BASE64_MAGICS: &[(&str, &str)] = &[
    ("JVBERi0", "pdf"),
    ("iVBORw0KGgo", "png"),
    ("/9j/", "jpeg"),
    ("UEsDB", "zip"),
    ("R0lGOD", "gif"),
];

/// A redacted value plus the side channel of removed originals.
#[derive(Clone, Debug, Default)]
pub struct RedactedOutput {
    pub value: Value,
    /// JSON path → original value, for every replaced field.
    pub side_channel: BTreeMap<String, Value>,
}

impl RedactedOutput {
    /// True when nothing was redacted (identity).
    pub fn is_identity(&self) -> bool {
        self.side_channel.is_empty()
    }
}

/// Stateless redactor walking a typed tree. Idempotent: placeholders are
/// recognized and left alone on a second pass.
pub struct ArtifactRedactor;

impl ArtifactRedactor {
    /// Redacts `value` using the tool's output schema when available. Binary
    /// sniffing applies regardless of schema.
    pub fn redact(value: &Value, schema: Option<&ValueSchema>) -> RedactedOutput {
        let mut side_channel = BTreeMap::new();
        let value = walk(value, schema, "", &mut side_channel);
        RedactedOutput {
            value,
            side_channel,
        }
    }

    /// True for strings produced by a previous redaction pass.
    pub fn is_placeholder(text: &str) -> bool {
        text.starts_with("<artifact:") && text.ends_with('>')
    }
}

fn walk(
    value: &Value,
    schema: Option<&ValueSchema>,
    path: &str,
    side_channel: &mut BTreeMap<String, Value>,
) -> Value {
    if let Value::String(s) = value {
        if ArtifactRedactor::is_placeholder(s) {
            return value.clone();
        }
    }

    if schema.is_some_and(|s| s.artifact) {
        let name = schema.map(ValueSchema::display_name).unwrap_or("value");
        return replace(value, name, path, side_channel);
    }

    if let Value::String(s) = value {
        if let Some((_, kind)) = BASE64_MAGICS.iter().find(|(magic, _)| s.starts_with(magic)) {
            return replace(value, kind, path, side_channel);
        }
    }

    match value {
        Value::Object(fields) => {
            let properties = schema.and_then(|s| match &s.kind {
                SchemaKind::Object { properties, .. } => Some(properties),
                _ => None,
            });
            let mut out = serde_json::Map::with_capacity(fields.len());
            for (name, field_value) in fields {
                let child_schema = properties.and_then(|p| p.get(name));
                let child_path = if path.is_empty() {
                    name.clone()
                } else {
                    format!("{path}.{name}")
                };
                out.insert(
                    name.clone(),
                    walk(field_value, child_schema, &child_path, side_channel),
                );
            }
            Value::Object(out)
        }
        Value::Array(elems) => {
            let items = schema.and_then(|s| match &s.kind {
                SchemaKind::Array(items) => Some(items.as_ref()),
                _ => None,
            });
            Value::Array(
                elems
                    .iter()
                    .enumerate()
                    .map(|(i, elem)| walk(elem, items, &format!("{path}[{i}]"), side_channel))
                    .collect(),
            )
        }
        other => other.clone(),
    }
}

fn replace(
    value: &Value,
    typename: &str,
    path: &str,
    side_channel: &mut BTreeMap<String, Value>,
) -> Value {
    let size = match value {
        Value::String(s) => s.len(),
        other => other.to_string().len(),
    };
    side_channel.insert(path.to_string(), value.clone());
    Value::String(format!("<artifact:{typename} size={size}>"))
}

/// Replaces the node at a side-channel `path` (e.g. `results[2].content`)
/// with `new_value`. Returns false when the path does not resolve.
pub fn set_at_path(root: &mut Value, path: &str, new_value: Value) -> bool {
    let mut current = root;
    let mut segments = parse_path(path);
    let Some(last) = segments.pop() else {
        return false;
    };
    for segment in segments {
        current = match segment {
            PathSeg::Key(key) => match current.get_mut(&key) {
                Some(next) => next,
                None => return false,
            },
            PathSeg::Idx(idx) => match current.get_mut(idx) {
                Some(next) => next,
                None => return false,
            },
        };
    }
    match last {
        PathSeg::Key(key) => match current.get_mut(&key) {
            Some(slot) => {
                *slot = new_value;
                true
            }
            None => false,
        },
        PathSeg::Idx(idx) => match current.get_mut(idx) {
            Some(slot) => {
                *slot = new_value;
                true
            }
            None => false,
        },
    }
}

enum PathSeg {
    Key(String),
    Idx(usize),
}

fn parse_path(path: &str) -> Vec<PathSeg> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        let mut rest = part;
        if let Some(bracket) = rest.find('[') {
            if bracket > 0 {
                segments.push(PathSeg::Key(rest[..bracket].to_string()));
            }
            rest = &rest[bracket..];
            while let Some(close) = rest.find(']') {
                if let Ok(idx) = rest[1..close].parse() {
                    segments.push(PathSeg::Idx(idx));
                }
                rest = &rest[close + 1..];
                if !rest.starts_with('[') {
                    break;
                }
            }
        } else if !rest.is_empty() {
            segments.push(PathSeg::Key(rest.to_string()));
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report_schema() -> ValueSchema {
        ValueSchema::parse(&json!({
            "type": "object",
            "properties": {
                "report": {"type": "string", "x-artifact": true, "title": "report"},
                "summary": {"type": "string"}
            }
        }))
        .unwrap()
    }

    /// **Scenario**: a schema-marked field is replaced with a placeholder and
    /// moved to the side channel; unmarked fields pass through.
    #[test]
    fn marked_field_is_replaced() {
        let schema = report_schema();
        let value = json!({"report": "very long body", "summary": "short"});
        let out = ArtifactRedactor::redact(&value, Some(&schema));
        assert_eq!(out.value["summary"], "short");
        assert_eq!(out.value["report"], "<artifact:report size=14>");
        assert_eq!(out.side_channel["report"], "very long body");
    }

    /// **Scenario**: a base64 PNG prefix triggers redaction with no schema at
    /// all.
    #[test]
    fn base64_magic_is_sniffed_without_schema() {
        let value = json!({"blob": "iVBORw0KGgoAAAANSUhEUg"});
        let out = ArtifactRedactor::redact(&value, None);
        assert_eq!(out.value["blob"], "<artifact:png size=22>");
        assert_eq!(out.side_channel.len(), 1);
    }

    /// **Scenario**: redaction is idempotent — a second pass changes nothing
    /// and records nothing.
    #[test]
    fn redaction_is_idempotent() {
        let schema = report_schema();
        let value = json!({"report": "JVBERi0xLjQK", "summary": "s"});
        let first = ArtifactRedactor::redact(&value, Some(&schema));
        let second = ArtifactRedactor::redact(&first.value, Some(&schema));
        assert_eq!(first.value, second.value);
        assert!(second.is_identity());
    }

    /// **Scenario**: array elements redact with indexed side-channel paths.
    #[test]
    fn array_elements_use_indexed_paths() {
        let schema = ValueSchema::parse(&json!({
            "type": "object",
            "properties": {
                "pages": {"type": "array", "items": {"type": "string", "x-artifact": true}}
            }
        }))
        .unwrap();
        let value = json!({"pages": ["one", "two"]});
        let out = ArtifactRedactor::redact(&value, Some(&schema));
        assert_eq!(out.side_channel["pages[0]"], "one");
        assert_eq!(out.side_channel["pages[1]"], "two");
    }

    /// **Scenario**: with no markers and no magic, redaction is the identity.
    #[test]
    fn identity_without_markers() {
        let value = json!({"temp_c": 12, "desc": "cloudy"});
        let out = ArtifactRedactor::redact(&value, None);
        assert_eq!(out.value, value);
        assert!(out.is_identity());
    }

    /// **Scenario**: side-channel paths resolve back into the tree for
    /// replacement, including through array indices.
    #[test]
    fn set_at_path_replaces_nodes() {
        let mut value = json!({"results": [{"content": "a"}, {"content": "b"}], "top": "t"});
        assert!(set_at_path(&mut value, "results[1].content", json!({"artifact": "x"})));
        assert_eq!(value["results"][1]["content"]["artifact"], "x");
        assert!(set_at_path(&mut value, "top", json!("replaced")));
        assert_eq!(value["top"], "replaced");
        assert!(!set_at_path(&mut value, "missing.path", json!(1)));
        assert!(!set_at_path(&mut value, "results[9]", json!(1)));
    }
}
