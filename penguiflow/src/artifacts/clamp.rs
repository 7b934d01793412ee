//! Observation clamp: enforces an absolute size budget on redacted
//! observations before they reach the trajectory and the model.
//!
//! Policy, in order: pass small observations through; store very large ones
//! as artifacts and keep a summary + preview inline; truncate the in-between
//! band recursively, deepest largest fields first.

use serde_json::Value;

use super::{ArtifactError, ArtifactStore, PutOutcome, PutRequest};
use crate::artifacts::ArtifactScope;

/// Size policy knobs. `auto_artifact_threshold` must sit above
/// `max_observation_chars`; the band between them is truncated inline.
#[derive(Clone, Debug)]
pub struct ObservationClamp {
    pub max_observation_chars: usize,
    pub auto_artifact_threshold: usize,
    pub preview_chars: usize,
}

impl Default for ObservationClamp {
    fn default() -> Self {
        Self {
            max_observation_chars: 6_000,
            auto_artifact_threshold: 32_000,
            preview_chars: 280,
        }
    }
}

/// Clamp result: the observation to persist plus the auto-stored artifact,
/// when one was written. Callers emit `artifact_stored` for fresh writes.
#[derive(Clone, Debug)]
pub struct ClampedObservation {
    pub value: Value,
    pub stored: Option<PutOutcome>,
}

/// Path segment used while hunting for truncation candidates.
#[derive(Clone, Debug)]
enum Seg {
    Key(String),
    Idx(usize),
}

impl ObservationClamp {
    /// Applies the clamp policy for `tool`'s observation.
    pub async fn clamp(
        &self,
        tool: &str,
        value: Value,
        store: &dyn ArtifactStore,
        scope: &ArtifactScope,
    ) -> Result<ClampedObservation, ArtifactError> {
        let serialized = value.to_string();
        if serialized.len() <= self.max_observation_chars {
            return Ok(ClampedObservation {
                value,
                stored: None,
            });
        }

        if serialized.len() >= self.auto_artifact_threshold {
            let outcome = store
                .put_text(
                    PutRequest::text(serialized.clone())
                        .with_mime("application/json")
                        .with_namespace(format!("observation.{tool}"))
                        .with_scope(scope.clone()),
                )
                .await?;
            let value = serde_json::json!({
                "artifact": outcome.reference,
                "summary": format!(
                    "{tool} observation of {} bytes stored as artifact", serialized.len()
                ),
                "preview": truncate_chars(&serialized, self.preview_chars),
            });
            return Ok(ClampedObservation {
                value,
                stored: Some(outcome),
            });
        }

        Ok(ClampedObservation {
            value: self.truncate_tree(value),
            stored: None,
        })
    }

    /// Recursive truncation: repeatedly halve the largest (then deepest)
    /// string/array field until the serialized size fits. Tags the result
    /// with `truncated: true`.
    fn truncate_tree(&self, mut value: Value) -> Value {
        for _ in 0..32 {
            if value.to_string().len() <= self.max_observation_chars {
                break;
            }
            let Some(path) = best_candidate(&value) else {
                break;
            };
            if let Some(target) = get_mut(&mut value, &path) {
                shrink(target);
            }
        }

        // Pathological trees (one giant scalar at the root, say) fall back to
        // a flat preview.
        if value.to_string().len() > self.max_observation_chars {
            return serde_json::json!({
                "preview": truncate_chars(&value.to_string(), self.max_observation_chars / 2),
                "truncated": true,
            });
        }

        match value {
            Value::Object(mut fields) => {
                fields.insert("truncated".to_string(), Value::Bool(true));
                Value::Object(fields)
            }
            other => serde_json::json!({"value": other, "truncated": true}),
        }
    }
}

/// Largest string/array node, ties broken by depth (deeper first). Returns
/// its path, or `None` when nothing truncatable remains.
fn best_candidate(value: &Value) -> Option<Vec<Seg>> {
    let mut best: Option<(usize, usize, Vec<Seg>)> = None;
    collect(value, 0, &mut Vec::new(), &mut best);
    best.map(|(_, _, path)| path)
}

fn collect(
    value: &Value,
    depth: usize,
    path: &mut Vec<Seg>,
    best: &mut Option<(usize, usize, Vec<Seg>)>,
) {
    let size = match value {
        Value::String(s) => s.len(),
        Value::Array(a) => a.len().max(1) * 8 + value.to_string().len() / 2,
        _ => 0,
    };
    // Only nodes that still shrink meaningfully are candidates.
    let shrinkable = match value {
        Value::String(s) => s.len() > 64,
        Value::Array(a) => a.len() > 1,
        _ => false,
    };
    if shrinkable {
        let better = match best {
            None => true,
            Some((best_size, best_depth, _)) => {
                size > *best_size || (size == *best_size && depth > *best_depth)
            }
        };
        if better {
            *best = Some((size, depth, path.clone()));
        }
    }
    match value {
        Value::Object(fields) => {
            for (name, field_value) in fields {
                path.push(Seg::Key(name.clone()));
                collect(field_value, depth + 1, path, best);
                path.pop();
            }
        }
        Value::Array(elems) => {
            for (i, elem) in elems.iter().enumerate() {
                path.push(Seg::Idx(i));
                collect(elem, depth + 1, path, best);
                path.pop();
            }
        }
        _ => {}
    }
}

fn get_mut<'v>(value: &'v mut Value, path: &[Seg]) -> Option<&'v mut Value> {
    let mut current = value;
    for seg in path {
        current = match seg {
            Seg::Key(key) => current.get_mut(key)?,
            Seg::Idx(idx) => current.get_mut(idx)?,
        };
    }
    Some(current)
}

/// Halves a string (char-safe, with an ellipsis) or drops the back half of
/// an array.
fn shrink(value: &mut Value) {
    match value {
        Value::String(s) => {
            let keep = truncate_chars(s, s.len() / 2);
            *s = format!("{keep}…");
        }
        Value::Array(elems) => {
            let keep = (elems.len() / 2).max(1);
            elems.truncate(keep);
        }
        _ => {}
    }
}

/// First `max` bytes of `text`, cut on a char boundary.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::InMemoryArtifactStore;
    use serde_json::json;

    fn clamp() -> ObservationClamp {
        ObservationClamp {
            max_observation_chars: 200,
            auto_artifact_threshold: 2_000,
            preview_chars: 40,
        }
    }

    /// **Scenario**: small observations pass through untouched.
    #[tokio::test]
    async fn small_observation_passes() {
        let store = InMemoryArtifactStore::with_defaults();
        let value = json!({"temp_c": 12, "desc": "cloudy"});
        let out = clamp()
            .clamp("weather.current", value.clone(), &store, &ArtifactScope::default())
            .await
            .unwrap();
        assert_eq!(out.value, value);
        assert!(out.stored.is_none());
    }

    /// **Scenario**: an observation at the auto-artifact threshold is stored
    /// and replaced by `{artifact, summary, preview}`; bytes never inline.
    #[tokio::test]
    async fn huge_observation_becomes_reference() {
        let store = InMemoryArtifactStore::with_defaults();
        let body = "x".repeat(5_000);
        let out = clamp()
            .clamp(
                "report.render",
                json!({"body": body}),
                &store,
                &ArtifactScope::default(),
            )
            .await
            .unwrap();
        let stored = out.stored.expect("artifact stored");
        assert!(stored.newly_stored);
        assert!(stored.reference.id.starts_with("observation.report.render_"));
        assert!(out.value["summary"].as_str().unwrap().contains("stored as artifact"));
        assert!(out.value["preview"].as_str().unwrap().len() <= 40);
        assert!(!out.value.to_string().contains(&body));
    }

    /// **Scenario**: the middle band truncates the largest string in place
    /// and tags the result.
    #[tokio::test]
    async fn middle_band_truncates_largest_field() {
        let store = InMemoryArtifactStore::with_defaults();
        let out = clamp()
            .clamp(
                "logs.tail",
                json!({"head": "short", "tail": "y".repeat(600)}),
                &store,
                &ArtifactScope::default(),
            )
            .await
            .unwrap();
        assert!(out.stored.is_none());
        assert_eq!(out.value["truncated"], true);
        assert_eq!(out.value["head"], "short");
        assert!(out.value["tail"].as_str().unwrap().len() < 600);
        assert!(out.value.to_string().len() <= 200 + "\"truncated\":true,".len());
    }

    /// **Scenario**: a giant root scalar falls back to a flat preview rather
    /// than passing through oversized.
    #[tokio::test]
    async fn scalar_root_falls_back_to_preview() {
        let store = InMemoryArtifactStore::with_defaults();
        let out = clamp()
            .clamp(
                "blob.emit",
                Value::String("z".repeat(50)),
                &store,
                &ArtifactScope::default(),
            )
            .await
            .unwrap();
        // 50 chars is under the cap: passes through.
        assert_eq!(out.value, Value::String("z".repeat(50)));

        let out = clamp()
            .clamp(
                "blob.emit",
                Value::Number(serde_json::Number::from(7)),
                &store,
                &ArtifactScope::default(),
            )
            .await
            .unwrap();
        assert_eq!(out.value, json!(7));
    }
}
