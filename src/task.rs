//! Task entity (`Task`).
//!
//! Grounded in the model crate's `task::Task`: the id/clone-gets-new-id
//! pattern, the `prompt()` builder, and the manual `Debug` impl are kept;
//! the field set is narrowed to what the execution kernel actually reads
//! (no guardrails, output-schema, or human-input fields — those belong to
//! the web-framework glue this kernel does not own).

use std::collections::HashMap;

use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::sanitize;

const MAX_DESCRIPTION_LEN: usize = 10_000;

/// Per-task streaming configuration (Task's `config`).
#[derive(Debug, Clone, Default)]
pub struct TaskConfig {
    pub streaming: bool,
}

/// A unit of work handed to a crew for execution.
#[derive(Clone)]
pub struct Task {
    pub id: Uuid,
    pub description: String,
    pub agent_role: Option<String>,
    pub tool_inputs: HashMap<String, HashMap<String, Value>>,
    pub context: HashMap<String, Value>,
    pub config: TaskConfig,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("agent_role", &self.agent_role)
            .finish_non_exhaustive()
    }
}

impl Task {
    /// Construct a task, sanitizing and length-capping `description`.
    pub fn new(description: impl Into<String>) -> Result<Self> {
        let description = sanitize::sanitize("description", &description.into(), MAX_DESCRIPTION_LEN)?;
        Ok(Self {
            id: Uuid::new_v4(),
            description,
            agent_role: None,
            tool_inputs: HashMap::new(),
            context: HashMap::new(),
            config: TaskConfig::default(),
        })
    }

    pub fn with_agent_role(mut self, role: impl Into<String>) -> Self {
        self.agent_role = Some(role.into());
        self
    }

    pub fn with_tool_input(mut self, tool_name: impl Into<String>, input: HashMap<String, Value>) -> Self {
        self.tool_inputs.insert(tool_name.into(), input);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.config.streaming = streaming;
        self
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task(id={}, description={})", self.id, self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sanitizes_and_caps_description() {
        let task = Task::new("do the thing\r\n").unwrap();
        assert_eq!(task.description, "do the thing");
    }

    #[test]
    fn new_rejects_dangerous_description() {
        let err = Task::new("<script>alert(1)</script>").unwrap_err();
        assert!(matches!(err, crate::error::Error::InputRejected(_)));
    }

    #[test]
    fn builder_chain_sets_fields() {
        let mut input = HashMap::new();
        input.insert("url".to_string(), Value::String("http://x".to_string()));
        let task = Task::new("desc")
            .unwrap()
            .with_agent_role("researcher")
            .with_tool_input("http", input)
            .with_context("k", Value::Bool(true));
        assert_eq!(task.agent_role.as_deref(), Some("researcher"));
        assert!(task.tool_inputs.contains_key("http"));
        assert_eq!(task.context.get("k"), Some(&Value::Bool(true)));
    }
}
