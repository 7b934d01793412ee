//! Structural value schemas: a JSON-Schema subset parsed once at registration
//! and walked on every tool call.
//!
//! Supported keywords: `type`, `properties`, `required`, `items`, `enum`,
//! `minimum`, `maximum`, `title`, and the artifact marker `x-artifact`.
//! Anything else is ignored so descriptors can carry vendor keywords.

use std::collections::BTreeMap;

use serde_json::Value;

use super::SchemaError;

/// Marker keyword for artifact-bearing fields in tool output schemas.
pub const ARTIFACT_MARKER: &str = "x-artifact";

/// Shape of one schema node.
#[derive(Clone, Debug, PartialEq)]
pub enum SchemaKind {
    /// No constraint; accepts any value.
    Any,
    Null,
    Bool,
    Integer,
    Number,
    String,
    Array(Box<ValueSchema>),
    Object {
        properties: BTreeMap<String, ValueSchema>,
        required: Vec<String>,
    },
}

/// A parsed schema node: kind plus the cross-kind constraints.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueSchema {
    pub kind: SchemaKind,
    /// True when the node is marked artifact-bearing (`x-artifact: true`).
    pub artifact: bool,
    pub title: Option<String>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub enum_values: Option<Vec<Value>>,
}

impl ValueSchema {
    /// A schema that accepts anything.
    pub fn any() -> Self {
        Self {
            kind: SchemaKind::Any,
            artifact: false,
            title: None,
            minimum: None,
            maximum: None,
            enum_values: None,
        }
    }

    /// Parses a JSON-Schema-subset document. Errors carry a human-readable
    /// detail; the caller attaches the tool name.
    pub fn parse(raw: &Value) -> Result<Self, String> {
        let obj = match raw {
            Value::Object(o) => o,
            Value::Bool(true) => return Ok(Self::any()),
            other => return Err(format!("schema must be an object, got {}", type_name(other))),
        };

        let artifact = obj
            .get(ARTIFACT_MARKER)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let title = obj
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string);
        let minimum = obj.get("minimum").and_then(Value::as_f64);
        let maximum = obj.get("maximum").and_then(Value::as_f64);
        let enum_values = obj
            .get("enum")
            .and_then(Value::as_array)
            .map(|v| v.to_vec());

        let declared_type = obj.get("type").and_then(Value::as_str);
        let kind = match declared_type {
            Some("null") => SchemaKind::Null,
            Some("boolean") => SchemaKind::Bool,
            Some("integer") => SchemaKind::Integer,
            Some("number") => SchemaKind::Number,
            Some("string") => SchemaKind::String,
            Some("array") => {
                let items = match obj.get("items") {
                    Some(items) => Self::parse(items)?,
                    None => Self::any(),
                };
                SchemaKind::Array(Box::new(items))
            }
            Some("object") | None if obj.contains_key("properties") || declared_type.is_some() => {
                let mut properties = BTreeMap::new();
                if let Some(Value::Object(props)) = obj.get("properties") {
                    for (name, prop) in props {
                        properties.insert(name.clone(), Self::parse(prop)?);
                    }
                }
                let required = obj
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|req| {
                        req.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                SchemaKind::Object {
                    properties,
                    required,
                }
            }
            Some(other) => return Err(format!("unsupported type `{other}`")),
            None => SchemaKind::Any,
        };

        Ok(Self {
            kind,
            artifact,
            title,
            minimum,
            maximum,
            enum_values,
        })
    }

    /// Validates `value` against this schema. Errors carry the JSON path of
    /// the first mismatch (e.g. `results[2].content`).
    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        self.validate_at(value, "")
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<(), SchemaError> {
        if let Some(allowed) = &self.enum_values {
            if !allowed.contains(value) {
                return Err(mismatch(path, "one of the enum values", value));
            }
        }
        match &self.kind {
            SchemaKind::Any => Ok(()),
            SchemaKind::Null => {
                if value.is_null() {
                    Ok(())
                } else {
                    Err(mismatch(path, "null", value))
                }
            }
            SchemaKind::Bool => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    Err(mismatch(path, "boolean", value))
                }
            }
            SchemaKind::Integer => {
                if value.is_i64() || value.is_u64() {
                    self.check_range(value, path)
                } else {
                    Err(mismatch(path, "integer", value))
                }
            }
            SchemaKind::Number => {
                if value.is_number() {
                    self.check_range(value, path)
                } else {
                    Err(mismatch(path, "number", value))
                }
            }
            SchemaKind::String => {
                if value.is_string() {
                    Ok(())
                } else {
                    Err(mismatch(path, "string", value))
                }
            }
            SchemaKind::Array(items) => match value {
                Value::Array(elems) => {
                    for (i, elem) in elems.iter().enumerate() {
                        items.validate_at(elem, &format!("{path}[{i}]"))?;
                    }
                    Ok(())
                }
                _ => Err(mismatch(path, "array", value)),
            },
            SchemaKind::Object {
                properties,
                required,
            } => match value {
                Value::Object(fields) => {
                    for name in required {
                        if !fields.contains_key(name) {
                            return Err(SchemaError::Mismatch {
                                path: join(path, name),
                                expected: "required field".into(),
                                got: "missing".into(),
                            });
                        }
                    }
                    for (name, field_value) in fields {
                        if let Some(prop) = properties.get(name) {
                            prop.validate_at(field_value, &join(path, name))?;
                        }
                        // Unknown fields are tolerated.
                    }
                    Ok(())
                }
                _ => Err(mismatch(path, "object", value)),
            },
        }
    }

    fn check_range(&self, value: &Value, path: &str) -> Result<(), SchemaError> {
        let n = value.as_f64().unwrap_or(0.0);
        if let Some(min) = self.minimum {
            if n < min {
                return Err(mismatch(path, &format!("number >= {min}"), value));
            }
        }
        if let Some(max) = self.maximum {
            if n > max {
                return Err(mismatch(path, &format!("number <= {max}"), value));
            }
        }
        Ok(())
    }

    /// JSON paths of artifact-marked nodes, relative to the root. A marker on
    /// an array schema marks its elements.
    pub fn artifact_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_artifact_paths("", &mut out);
        out
    }

    fn collect_artifact_paths(&self, path: &str, out: &mut Vec<String>) {
        if self.artifact {
            out.push(path.to_string());
        }
        match &self.kind {
            SchemaKind::Object { properties, .. } => {
                for (name, prop) in properties {
                    prop.collect_artifact_paths(&join(path, name), out);
                }
            }
            SchemaKind::Array(items) => {
                items.collect_artifact_paths(&format!("{path}[]"), out);
            }
            _ => {}
        }
    }

    /// Display name used in redaction placeholders: the node title, or the
    /// JSON type name.
    pub fn display_name(&self) -> &str {
        if let Some(title) = &self.title {
            return title;
        }
        match &self.kind {
            SchemaKind::Any => "value",
            SchemaKind::Null => "null",
            SchemaKind::Bool => "boolean",
            SchemaKind::Integer => "integer",
            SchemaKind::Number => "number",
            SchemaKind::String => "string",
            SchemaKind::Array(_) => "array",
            SchemaKind::Object { .. } => "object",
        }
    }
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{path}.{field}")
    }
}

fn mismatch(path: &str, expected: &str, got: &Value) -> SchemaError {
    SchemaError::Mismatch {
        path: path.to_string(),
        expected: expected.to_string(),
        got: type_name(got).to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
