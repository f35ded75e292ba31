//! Flow engine (C8).
//!
//! Drives an ordered list of tagged [`FlowStep`]s against a shared,
//! step-name-keyed context, with per-step gating conditions and
//! `continue_on_error` semantics. This is a new design rather than an
//! adaptation of the model crate's `flow::flow::Flow` — that engine is
//! built around `@start`/`@listen`/`@router` method-decorator dispatch over
//! a user's state struct, which has no counterpart in this tagged
//! step-list model. The event-handler map (`step_completed`/`step_failed`)
//! and the overall `run() -> FlowResult` shape are grounded in the model
//! crate's `flow::flow_events::FlowEvent` naming.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::condition::Condition;
use crate::crew::Crew;
use crate::error::{Error, Result};
use crate::types::{FlowResult, StepResult};

/// A step's custom-handler capability (the `Custom` variant's payload).
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn call(&self, context: &HashMap<String, Value>) -> Result<Value>;
}

#[async_trait]
impl<F> StepHandler for F
where
    F: Fn(&HashMap<String, Value>) -> Result<Value> + Send + Sync,
{
    async fn call(&self, context: &HashMap<String, Value>) -> Result<Value> {
        (self)(context)
    }
}

/// Per-step configuration (`FlowStep` config).
#[derive(Debug, Clone, Default)]
pub struct StepConfig {
    pub continue_on_error: bool,
}

/// What a step does when dispatched (`FlowStep` tagged variants).
pub enum StepKind {
    Crew(Crew),
    Condition(Condition),
    Delay(Duration),
    Custom(Arc<dyn StepHandler>),
}

impl std::fmt::Debug for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::Crew(_) => write!(f, "Crew"),
            StepKind::Condition(c) => write!(f, "Condition({c:?})"),
            StepKind::Delay(d) => write!(f, "Delay({d:?})"),
            StepKind::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// One step of a flow: a kind, a unique name, gating conditions, and config.
pub struct FlowStep {
    pub name: String,
    pub kind: StepKind,
    pub conditions: Vec<Condition>,
    pub config: StepConfig,
}

impl FlowStep {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            conditions: Vec::new(),
            config: StepConfig::default(),
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.config.continue_on_error = continue_on_error;
        self
    }

    fn type_name(&self) -> &'static str {
        match self.kind {
            StepKind::Crew(_) => "crew",
            StepKind::Condition(_) => "condition",
            StepKind::Delay(_) => "delay",
            StepKind::Custom(_) => "custom",
        }
    }
}

/// Event names a flow fires into registered handlers (Flow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowEvent {
    StepCompleted,
    StepFailed,
}

pub type EventHandler = Arc<dyn Fn(&StepResult) + Send + Sync>;

/// Recognized flow configuration options (Flow).
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub max_steps: usize,
    pub timeout: Duration,
    pub continue_on_error: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            timeout: Duration::from_secs(600),
            continue_on_error: false,
        }
    }
}

/// An ordered pipeline of steps sharing one context (`Flow`).
pub struct Flow {
    pub name: Option<String>,
    pub steps: Vec<FlowStep>,
    pub context: HashMap<String, Value>,
    pub config: FlowConfig,
    handlers: HashMap<FlowEvent, Vec<EventHandler>>,
}

impl Flow {
    pub fn new(steps: Vec<FlowStep>) -> Self {
        Self {
            name: None,
            steps,
            context: HashMap::new(),
            config: FlowConfig::default(),
            handlers: HashMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn on(&mut self, event: FlowEvent, handler: EventHandler) {
        self.handlers.entry(event).or_default().push(handler);
    }

    fn fire(&self, event: FlowEvent, result: &StepResult) {
        if let Some(handlers) = self.handlers.get(&event) {
            for handler in handlers {
                handler(result);
            }
        }
    }

    /// `run() -> FlowResult`. Honors `config.timeout` as a deadline
    /// for the whole run; on expiry the flow aborts with `FlowTimedOut`,
    /// returning whatever step results had completed so far.
    pub async fn run(&mut self) -> FlowResult {
        let start = Instant::now();
        let timeout = self.config.timeout;
        match tokio::time::timeout(timeout, self.run_steps(start)).await {
            Ok(result) => result,
            Err(_) => FlowResult {
                results: Vec::new(),
                execution_time: start.elapsed().as_secs_f64(),
                success: false,
                error: Some(Error::FlowTimedOut(timeout).to_string()),
            },
        }
    }

    async fn run_steps(&mut self, start: Instant) -> FlowResult {
        let mut results = Vec::new();

        if self.steps.len() > self.config.max_steps {
            return FlowResult {
                results,
                execution_time: start.elapsed().as_secs_f64(),
                success: false,
                error: Some(format!(
                    "flow has {} steps, exceeding max_steps {}",
                    self.steps.len(),
                    self.config.max_steps
                )),
            };
        }

        for index in 0..self.steps.len() {
            if !self.steps[index].conditions.iter().all(|c| c.evaluate(&self.context)) {
                continue;
            }

            let step_start = Instant::now();
            let name = self.steps[index].name.clone();
            let type_name = self.steps[index].type_name();
            log::debug!("flow step {index} ({name}, {type_name}) starting");
            let outcome = self.dispatch(index).await;
            let execution_time = step_start.elapsed().as_secs_f64();
            log::debug!("flow step {index} ({name}) finished in {execution_time:.3}s, ok={}", outcome.is_ok());

            match outcome {
                Ok(value) => {
                    self.context.insert(name.clone(), value.clone());
                    let result = StepResult {
                        step_index: index,
                        step_name: name,
                        step_type: type_name.to_string(),
                        result: Some(value),
                        execution_time,
                        success: true,
                        error: None,
                    };
                    self.fire(FlowEvent::StepCompleted, &result);
                    results.push(result);
                }
                Err(e) => {
                    let result = StepResult {
                        step_index: index,
                        step_name: name,
                        step_type: type_name.to_string(),
                        result: None,
                        execution_time,
                        success: false,
                        error: Some(e.to_string()),
                    };
                    self.fire(FlowEvent::StepFailed, &result);
                    let continue_on_error = self.steps[index].config.continue_on_error;
                    results.push(result);
                    if !continue_on_error {
                        return FlowResult {
                            results,
                            execution_time: start.elapsed().as_secs_f64(),
                            success: false,
                            error: Some(e.to_string()),
                        };
                    }
                }
            }
        }

        FlowResult {
            results,
            execution_time: start.elapsed().as_secs_f64(),
            success: true,
            error: None,
        }
    }

    async fn dispatch(&self, index: usize) -> Result<Value> {
        match &self.steps[index].kind {
            StepKind::Crew(crew) => {
                let result = crew.execute().await;
                if !result.success {
                    return Err(Error::StepFailed(
                        result.error.clone().unwrap_or_else(|| "crew step failed".to_string()),
                    ));
                }
                serde_json::to_value(result).map_err(Error::from)
            }
            StepKind::Condition(condition) => Ok(Value::Bool(condition.evaluate(&self.context))),
            StepKind::Delay(seconds) => {
                tokio::time::sleep(*seconds).await;
                Ok(Value::Bool(true))
            }
            StepKind::Custom(handler) => handler.call(&self.context).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn delay_step_records_true_and_elapses() {
        let steps = vec![FlowStep::new("wait", StepKind::Delay(Duration::from_millis(1)))];
        let mut flow = Flow::new(steps);
        let result = flow.run().await;
        assert!(result.success);
        assert_eq!(result.results[0].result, Some(Value::Bool(true)));
    }

    #[tokio::test]
    async fn condition_step_records_boolean_and_context_is_visible_downstream() {
        let steps = vec![
            FlowStep::new(
                "is_ready",
                StepKind::Custom(Arc::new(|_ctx: &HashMap<String, Value>| Ok(json!(5)))),
            ),
            FlowStep::new(
                "gate",
                StepKind::Condition(Condition::simple("is_ready", "==", json!(5))),
            ),
        ];
        let mut flow = Flow::new(steps);
        let result = flow.run().await;
        assert!(result.success);
        assert_eq!(result.results[1].result, Some(Value::Bool(true)));
    }

    #[tokio::test]
    async fn failing_step_without_continue_on_error_stops_the_flow() {
        let steps = vec![
            FlowStep::new(
                "boom",
                StepKind::Custom(Arc::new(|_ctx: &HashMap<String, Value>| {
                    Err(Error::StepFailed("nope".to_string()))
                })),
            ),
            FlowStep::new("never", StepKind::Delay(Duration::from_millis(1))),
        ];
        let mut flow = Flow::new(steps);
        let result = flow.run().await;
        assert!(!result.success);
        assert_eq!(result.results.len(), 1);
    }

    #[tokio::test]
    async fn failing_step_with_continue_on_error_proceeds() {
        let steps = vec![
            FlowStep::new(
                "boom",
                StepKind::Custom(Arc::new(|_ctx: &HashMap<String, Value>| {
                    Err(Error::StepFailed("nope".to_string()))
                })),
            )
            .with_continue_on_error(true),
            FlowStep::new("after", StepKind::Delay(Duration::from_millis(1))),
        ];
        let mut flow = Flow::new(steps);
        let result = flow.run().await;
        assert!(result.success);
        assert_eq!(result.results.len(), 2);
    }

    #[tokio::test]
    async fn gated_step_with_false_condition_is_skipped() {
        let steps = vec![FlowStep::new("skip_me", StepKind::Delay(Duration::from_millis(1)))
            .with_condition(Condition::simple("flag", "==", json!(true)))];
        let mut flow = Flow::new(steps);
        let result = flow.run().await;
        assert!(result.success);
        assert!(result.results.is_empty());
    }

    #[tokio::test]
    async fn slow_flow_aborts_with_flow_timed_out() {
        let steps = vec![FlowStep::new("wait", StepKind::Delay(Duration::from_millis(50)))];
        let mut flow = Flow::new(steps).with_config(FlowConfig {
            timeout: Duration::from_millis(5),
            ..FlowConfig::default()
        });
        let result = flow.run().await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn step_completed_event_fires_without_mutating_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let steps = vec![FlowStep::new("wait", StepKind::Delay(Duration::from_millis(1)))];
        let mut flow = Flow::new(steps);
        flow.on(
            FlowEvent::StepCompleted,
            Arc::new(move |_r| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let result = flow.run().await;
        assert!(result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
