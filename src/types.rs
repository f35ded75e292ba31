//! Shared value records returned from agent/crew/flow execution.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The result of a single agent call (streamed or whole).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub content: String,
    pub agent_role: String,
    pub tool_results: HashMap<String, Value>,
    pub execution_time: f64,
}

/// One task's outcome within a `CrewResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_index: usize,
    pub agent: String,
    pub response: Response,
    pub execution_time: f64,
}

/// The outcome of `Crew::execute`/`Crew::kickoff`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrewResult {
    pub results: Vec<TaskResult>,
    pub execution_time: f64,
    pub success: bool,
    pub error: Option<String>,
}

/// One step's outcome within a `FlowResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: usize,
    pub step_name: String,
    pub step_type: String,
    pub result: Option<Value>,
    pub execution_time: f64,
    pub success: bool,
    pub error: Option<String>,
}

/// The outcome of `Flow::run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowResult {
    pub results: Vec<StepResult>,
    pub execution_time: f64,
    pub success: bool,
    pub error: Option<String>,
}

pub(crate) fn elapsed_secs(start: std::time::Instant) -> f64 {
    start.elapsed().as_secs_f64()
}

pub(crate) fn duration_from_secs_f64(secs: f64) -> Duration {
    Duration::from_secs_f64(secs.max(0.0))
}
