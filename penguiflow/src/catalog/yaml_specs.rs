//! YAML-backed tool descriptors: load catalog entries from data files so
//! deployments can ship tool metadata without recompiling.
//!
//! One YAML document holds a list of entries, each a namespace plus the
//! descriptor fields (schemas inline as JSON-compatible YAML).

use serde::Deserialize;
use thiserror::Error;

use super::ToolDescriptor;

/// Errors from parsing descriptor YAML.
#[derive(Debug, Error)]
pub enum YamlSpecError {
    #[error("failed to parse descriptor YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("descriptor entry {index} is missing a namespace")]
    MissingNamespace { index: usize },
}

#[derive(Deserialize)]
struct YamlEntry {
    #[serde(default)]
    namespace: String,
    #[serde(flatten)]
    descriptor: ToolDescriptor,
}

/// Parses a YAML document into `(namespace, descriptor)` pairs ready for
/// [`ToolCatalog::register`](super::ToolCatalog::register).
pub fn descriptors_from_yaml(yaml: &str) -> Result<Vec<(String, ToolDescriptor)>, YamlSpecError> {
    let entries: Vec<YamlEntry> = serde_yaml::from_str(yaml)?;
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            if entry.namespace.is_empty() {
                return Err(YamlSpecError::MissingNamespace { index });
            }
            Ok((entry.namespace, entry.descriptor))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{LoadingMode, SideEffects};

    const SPECS: &str = r#"
- namespace: weather
  name: current
  description: Current weather for a city.
  side_effects: read
  timeout_s: 10
  max_concurrency: 4
  input_schema:
    type: object
    properties:
      city: { type: string }
    required: [city]
  output_schema:
    type: object
    properties:
      temp_c: { type: number }
      desc: { type: string }
- namespace: net
  name: fetch
  description: Fetch a URL.
  side_effects: external
  loading_mode: deferred
"#;

    /// **Scenario**: a two-entry document parses with schemas, modes and
    /// limits intact.
    #[test]
    fn parses_entries_with_fields() {
        let entries = descriptors_from_yaml(SPECS).unwrap();
        assert_eq!(entries.len(), 2);

        let (ns, weather) = &entries[0];
        assert_eq!(ns, "weather");
        assert_eq!(weather.name, "current");
        assert_eq!(weather.side_effects, SideEffects::Read);
        assert_eq!(weather.max_concurrency, Some(4));
        assert_eq!(weather.input_schema["required"][0], "city");

        let (_, fetch) = &entries[1];
        assert_eq!(fetch.loading_mode, LoadingMode::Deferred);
    }

    /// **Scenario**: an entry without a namespace is rejected with its index.
    #[test]
    fn missing_namespace_is_rejected() {
        let err = descriptors_from_yaml("- name: lonely\n").unwrap_err();
        assert!(matches!(err, YamlSpecError::MissingNamespace { index: 0 }));
    }
}
