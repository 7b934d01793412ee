//! Model registry: maps a qualified tool name to its input/output validators.
//!
//! Validators are structural (required fields, types, ranges, artifact
//! markers) and are parsed once at registration. Registration is idempotent
//! for identical schemas; differing schemas for the same name collide.

pub mod schema;

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;

pub use schema::{SchemaKind, ValueSchema, ARTIFACT_MARKER};

/// Errors from schema registration and validation.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A value did not match the declared schema; `path` is the first
    /// mismatching JSON path.
    #[error("schema mismatch at `{path}`: expected {expected}, got {got}")]
    Mismatch {
        path: String,
        expected: String,
        got: String,
    },
    /// Re-registration of the same name with a structurally different schema.
    #[error("schema collision for tool `{0}`")]
    NameCollision(String),
    #[error("no schemas registered for tool `{0}`")]
    UnknownTool(String),
    #[error("invalid schema for tool `{name}`: {detail}")]
    InvalidSchema { name: String, detail: String },
}

/// Parsed input/output schemas for one tool.
#[derive(Clone, Debug)]
pub struct ToolSchemas {
    raw_in: Value,
    raw_out: Value,
    input: ValueSchema,
    output: ValueSchema,
}

impl ToolSchemas {
    pub fn input(&self) -> &ValueSchema {
        &self.input
    }

    pub fn output(&self) -> &ValueSchema {
        &self.output
    }
}

/// Registry of tool schemas, keyed by qualified tool name.
///
/// Read-mostly: writes happen at startup when tools are registered; lookups
/// happen on every dispatch.
#[derive(Default)]
pub struct SchemaRegistry {
    entries: DashMap<String, Arc<ToolSchemas>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers input/output schemas for `name`. Idempotent when the raw
    /// schemas are identical; otherwise fails with [`SchemaError::NameCollision`].
    pub fn register(
        &self,
        name: &str,
        input_schema: &Value,
        output_schema: &Value,
    ) -> Result<(), SchemaError> {
        if let Some(existing) = self.entries.get(name) {
            if existing.raw_in == *input_schema && existing.raw_out == *output_schema {
                return Ok(());
            }
            return Err(SchemaError::NameCollision(name.to_string()));
        }
        let input = ValueSchema::parse(input_schema).map_err(|detail| {
            SchemaError::InvalidSchema {
                name: name.to_string(),
                detail,
            }
        })?;
        let output = ValueSchema::parse(output_schema).map_err(|detail| {
            SchemaError::InvalidSchema {
                name: name.to_string(),
                detail,
            }
        })?;
        self.entries.insert(
            name.to_string(),
            Arc::new(ToolSchemas {
                raw_in: input_schema.clone(),
                raw_out: output_schema.clone(),
                input,
                output,
            }),
        );
        Ok(())
    }

    /// Validates a tool's input arguments.
    pub fn validate_in(&self, name: &str, value: &Value) -> Result<(), SchemaError> {
        self.lookup(name)?.input.validate(value)
    }

    /// Validates a tool's output value.
    pub fn validate_out(&self, name: &str, value: &Value) -> Result<(), SchemaError> {
        self.lookup(name)?.output.validate(value)
    }

    /// Parsed schemas for `name`, when registered. The redactor uses the
    /// output schema to find artifact-marked fields.
    pub fn schemas(&self, name: &str) -> Option<Arc<ToolSchemas>> {
        self.entries.get(name).map(|e| Arc::clone(e.value()))
    }

    fn lookup(&self, name: &str) -> Result<Arc<ToolSchemas>, SchemaError> {
        self.schemas(name)
            .ok_or_else(|| SchemaError::UnknownTool(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn in_schema() -> Value {
        json!({"type": "object", "properties": {"city": {"type": "string"}}, "required": ["city"]})
    }

    fn out_schema() -> Value {
        json!({"type": "object", "properties": {"temp_c": {"type": "number"}}})
    }

    /// **Scenario**: identical re-registration is idempotent; a differing one
    /// collides.
    #[test]
    fn idempotent_registration_and_collision() {
        let registry = SchemaRegistry::new();
        registry
            .register("weather.current", &in_schema(), &out_schema())
            .unwrap();
        registry
            .register("weather.current", &in_schema(), &out_schema())
            .unwrap();
        let err = registry
            .register("weather.current", &in_schema(), &json!({"type": "string"}))
            .unwrap_err();
        assert!(matches!(err, SchemaError::NameCollision(name) if name == "weather.current"));
    }

    /// **Scenario**: input validation fails with a path for a missing field;
    /// unknown tools are reported as such.
    #[test]
    fn validate_in_paths_and_unknown_tool() {
        let registry = SchemaRegistry::new();
        registry
            .register("weather.current", &in_schema(), &out_schema())
            .unwrap();
        let err = registry
            .validate_in("weather.current", &json!({}))
            .unwrap_err();
        assert!(matches!(err, SchemaError::Mismatch { path, .. } if path == "city"));
        assert!(matches!(
            registry.validate_in("missing.tool", &json!({})),
            Err(SchemaError::UnknownTool(_))
        ));
    }

    /// **Scenario**: output validation walks the registered output schema.
    #[test]
    fn validate_out_uses_output_schema() {
        let registry = SchemaRegistry::new();
        registry
            .register("weather.current", &in_schema(), &out_schema())
            .unwrap();
        assert!(registry
            .validate_out("weather.current", &json!({"temp_c": 12.5}))
            .is_ok());
        assert!(registry
            .validate_out("weather.current", &json!({"temp_c": "warm"}))
            .is_err());
    }
}
