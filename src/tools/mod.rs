//! Tool registry & invocation (C3).
//!
//! Each tool exposes name, description, schema, and
//! `execute(input) -> mapping`. Grounded in the model crate's
//! `tools::base_tool::BaseTool` trait shape, narrowed to a
//! validate-then-execute contract and field-schema format.

pub mod builtin;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};

/// A field type recognized by a tool's input schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Array,
    Integer,
    Float,
    Boolean,
}

/// One field's validation rule within a tool's input schema.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub required: bool,
    pub field_type: FieldType,
    pub max_length: Option<usize>,
}

impl FieldSchema {
    pub fn new(required: bool, field_type: FieldType) -> Self {
        Self {
            required,
            field_type,
            max_length: None,
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }
}

pub type ToolSchema = HashMap<String, FieldSchema>;

/// Capability abstraction every built-in (and user-defined) tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> &ToolSchema;

    async fn execute(&self, input: HashMap<String, Value>) -> Result<Value>;

    /// Validate `input` against `schema()`, then execute. Unknown fields are
    /// dropped; dangerous text is rejected. This is the entry point callers
    /// (agent, MCP bridge) should use — not `execute` directly, so
    /// validation cannot be bypassed.
    async fn run(&self, input: HashMap<String, Value>) -> Result<Value> {
        let validated = validate_input(self.schema(), input)?;
        self.execute(validated).await
    }
}

/// Validate and coerce `input` against `schema`: required fields present,
/// types coerced, `max_length` honored for strings, unknown fields dropped,
/// dangerous text rejected.
pub fn validate_input(
    schema: &ToolSchema,
    input: HashMap<String, Value>,
) -> Result<HashMap<String, Value>> {
    let mut validated = HashMap::new();

    for (field, rule) in schema {
        match input.get(field) {
            Some(value) => {
                let coerced = coerce(field, value, rule)?;
                if let Value::String(s) = &coerced {
                    crate::sanitize::reject_dangerous(s).map_err(|e| {
                        Error::ToolInputInvalid {
                            field: field.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                }
                validated.insert(field.clone(), coerced);
            }
            None if rule.required => {
                return Err(Error::ToolInputInvalid {
                    field: field.clone(),
                    reason: "required field missing".to_string(),
                })
            }
            None => {}
        }
    }

    Ok(validated)
}

fn coerce(field: &str, value: &Value, rule: &FieldSchema) -> Result<Value> {
    let invalid = |reason: &str| {
        Error::ToolInputInvalid {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    };

    let coerced = match rule.field_type {
        FieldType::String => {
            let s = value
                .as_str()
                .map(|s| s.to_string())
                .or_else(|| value.as_i64().map(|n| n.to_string()))
                .or_else(|| value.as_f64().map(|n| n.to_string()))
                .ok_or_else(|| invalid("expected a string"))?;
            if let Some(max) = rule.max_length {
                if s.chars().count() > max {
                    return Err(Error::ToolInputInvalid {
                        field: field.to_string(),
                        reason: format!("exceeds max_length {max}"),
                    });
                }
            }
            Value::String(s)
        }
        FieldType::Array => {
            if !value.is_array() {
                return Err(invalid("expected an array"));
            }
            value.clone()
        }
        FieldType::Integer => {
            let n = value.as_i64().ok_or_else(|| invalid("expected an integer"))?;
            Value::from(n)
        }
        FieldType::Float => {
            let n = value.as_f64().ok_or_else(|| invalid("expected a float"))?;
            Value::from(n)
        }
        FieldType::Boolean => {
            let b = value.as_bool().ok_or_else(|| invalid("expected a boolean"))?;
            Value::Bool(b)
        }
    };
    Ok(coerced)
}

/// Registry of tool instances keyed by name (unique keys Agent's
/// `tools` mapping).
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, std::sync::Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: std::sync::Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_missing_required_field() {
        let mut schema = ToolSchema::new();
        schema.insert("url".to_string(), FieldSchema::new(true, FieldType::String));
        let err = validate_input(&schema, HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::ToolInputInvalid { .. }));
    }

    #[test]
    fn validate_drops_unknown_fields() {
        let mut schema = ToolSchema::new();
        schema.insert("url".to_string(), FieldSchema::new(true, FieldType::String));
        let mut input = HashMap::new();
        input.insert("url".to_string(), Value::String("http://x".to_string()));
        input.insert("unexpected".to_string(), Value::Bool(true));
        let validated = validate_input(&schema, input).unwrap();
        assert_eq!(validated.len(), 1);
        assert!(!validated.contains_key("unexpected"));
    }

    #[test]
    fn validate_enforces_max_length() {
        let mut schema = ToolSchema::new();
        schema.insert(
            "q".to_string(),
            FieldSchema::new(true, FieldType::String).with_max_length(3),
        );
        let mut input = HashMap::new();
        input.insert("q".to_string(), Value::String("abcdef".to_string()));
        let err = validate_input(&schema, input).unwrap_err();
        assert!(matches!(err, Error::ToolInputInvalid { .. }));
    }

    #[test]
    fn validate_rejects_dangerous_string_content() {
        let mut schema = ToolSchema::new();
        schema.insert("q".to_string(), FieldSchema::new(true, FieldType::String));
        let mut input = HashMap::new();
        input.insert("q".to_string(), Value::String("<script>alert(1)</script>".to_string()));
        assert!(validate_input(&schema, input).is_err());
    }
}
