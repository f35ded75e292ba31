//! Deferred-execution bridge (C11).
//!
//! A crew or flow can be dispatched into a persistent job queue instead of
//! run inline. The enqueuer serializes a canonical descriptor (agents, tasks,
//! flow steps); a worker dequeues, validates, rehydrates live `Crew`/`Flow`
//! values, and runs them. Grounded in the model crate's
//! `memory::storage::ltm_sqlite_storage::LTMSQLiteStorage` pattern for the
//! durable job table (synchronous `rusqlite::Connection` behind a mutex,
//! `spawn_blocking` at async call sites) and in `flow::mod`'s event-handler
//! map for the `CrewExecuted`/`FlowExecuted` announcements. The queue itself
//! is a `tokio::sync::mpsc` channel, matching the in-process producer/
//! consumer shape used by the streaming envelope (C2) and the provider
//! streaming helpers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::agent::{Agent, AgentConfig};
use crate::condition::Condition;
use crate::crew::{Crew, CrewConfig, ExecutionMode};
use crate::error::{Error, Result};
use crate::flow::{Flow, FlowConfig, FlowStep, StepHandler, StepKind};
use crate::llm::ProviderRegistry;
use crate::memory::Memory;
use crate::sanitize;
use crate::task::Task;
use crate::tools::builtin::WHITELISTED_TOOL_IDS;
use crate::tools::Tool;

/// Serializable form of a `Condition` (`FlowStep`'s gating conditions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConditionDescriptor {
    Simple { variable: String, op: String, literal: Value },
    Expression(String),
}

impl ConditionDescriptor {
    fn rehydrate(&self) -> Condition {
        match self {
            Self::Simple { variable, op, literal } => {
                Condition::simple(variable.clone(), op.as_str(), literal.clone())
            }
            Self::Expression(expr) => Condition::expression(expr.clone()),
        }
    }
}

/// Serializable form of an `Agent`: role, goal, provider name, config,
/// and list of tool descriptors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub role: String,
    pub goal: String,
    pub provider_name: String,
    pub tool_ids: Vec<String>,
    pub memory_search_limit: usize,
}

/// Serializable form of a `Task`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskDescriptor {
    pub description: String,
    pub agent_role: Option<String>,
    pub tool_inputs: HashMap<String, HashMap<String, Value>>,
    pub context: HashMap<String, Value>,
    pub streaming: bool,
}

/// Serializable form of `CrewConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrewConfigDescriptor {
    pub parallel: bool,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub max_parallel_tasks: usize,
}

impl Default for CrewConfigDescriptor {
    fn default() -> Self {
        let d = CrewConfig::default();
        Self {
            parallel: d.execution_mode == ExecutionMode::Parallel,
            max_retries: d.max_retries,
            timeout_secs: d.timeout.as_secs(),
            max_parallel_tasks: d.max_parallel_tasks,
        }
    }
}

/// Serializable form of a `Crew`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrewDescriptor {
    pub agents: Vec<AgentDescriptor>,
    pub tasks: Vec<TaskDescriptor>,
    pub config: CrewConfigDescriptor,
}

/// Serializable form of `FlowConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfigDescriptor {
    pub max_steps: usize,
    pub timeout_secs: u64,
    pub continue_on_error: bool,
}

impl Default for FlowConfigDescriptor {
    fn default() -> Self {
        let d = FlowConfig::default();
        Self {
            max_steps: d.max_steps,
            timeout_secs: d.timeout.as_secs(),
            continue_on_error: d.continue_on_error,
        }
    }
}

/// Serializable form of `StepKind`. A `Custom` step carries a handler
/// identifier resolved against a bridge-local registry at
/// rehydration time rather than a serialized closure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepKindDescriptor {
    Crew(CrewDescriptor),
    Condition(ConditionDescriptor),
    Delay { millis: u64 },
    Custom { handler_id: String },
}

/// Serializable form of a `FlowStep`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowStepDescriptor {
    pub name: String,
    pub kind: StepKindDescriptor,
    pub conditions: Vec<ConditionDescriptor>,
    pub continue_on_error: bool,
}

/// Serializable form of a `Flow`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDescriptor {
    pub name: Option<String>,
    pub steps: Vec<FlowStepDescriptor>,
    pub config: FlowConfigDescriptor,
}

/// A queued unit of deferred work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobDescriptor {
    Crew(CrewDescriptor),
    Flow(FlowDescriptor),
}

#[derive(Debug, Clone)]
struct Job {
    id: Uuid,
    descriptor: JobDescriptor,
}

/// Announcements a worker fires after running a job ("Result handling").
#[derive(Debug, Clone)]
pub enum DeferredEvent {
    CrewExecuted { job_id: Uuid, result: crate::types::CrewResult },
    CrewExecutionFailed { job_id: Uuid, error: String },
    FlowExecuted { job_id: Uuid, result: crate::types::FlowResult },
    FlowExecutionFailed { job_id: Uuid, error: String },
}

pub type DeferredEventHandler = Arc<dyn Fn(&DeferredEvent) + Send + Sync>;

/// Bridges in-process queued jobs to live execution, enforcing the tool
/// rehydration whitelist and re-sanitizing every agent/task field (/// security invariant).
pub struct DeferredBridge {
    sender: mpsc::Sender<Job>,
    receiver: Mutex<Option<mpsc::Receiver<Job>>>,
    jobs_db: Arc<Mutex<Connection>>,
    memory: Arc<Memory>,
    providers: Arc<ProviderRegistry>,
    tools: HashMap<String, Arc<dyn Tool>>,
    custom_handlers: HashMap<String, Arc<dyn StepHandler>>,
    handlers: Mutex<Vec<DeferredEventHandler>>,
}

impl DeferredBridge {
    pub fn new(
        db_path: &str,
        memory: Arc<Memory>,
        providers: Arc<ProviderRegistry>,
        tools: HashMap<String, Arc<dyn Tool>>,
    ) -> Result<Self> {
        let conn = if db_path == ":memory:" {
            Connection::open_in_memory().map_err(|e| Error::Storage(e.to_string()))?
        } else {
            Connection::open(db_path).map_err(|e| Error::Storage(e.to_string()))?
        };
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS deferred_jobs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                descriptor TEXT NOT NULL,
                status TEXT NOT NULL,
                enqueued_at TEXT NOT NULL,
                completed_at TEXT
             );",
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        let (sender, receiver) = mpsc::channel(256);
        Ok(Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            jobs_db: Arc::new(Mutex::new(conn)),
            memory,
            providers,
            tools,
            custom_handlers: HashMap::new(),
            handlers: Mutex::new(Vec::new()),
        })
    }

    pub fn with_custom_handler(mut self, id: impl Into<String>, handler: Arc<dyn StepHandler>) -> Self {
        self.custom_handlers.insert(id.into(), handler);
        self
    }

    pub fn on_event(&self, handler: DeferredEventHandler) {
        self.handlers.lock().unwrap().push(handler);
    }

    fn fire(&self, event: DeferredEvent) {
        for handler in self.handlers.lock().unwrap().iter() {
            handler(&event);
        }
    }

    fn persist_job(&self, id: Uuid, kind: &str, descriptor: &JobDescriptor) -> Result<()> {
        let conn = self.jobs_db.lock().unwrap();
        let descriptor_json = serde_json::to_string(descriptor)?;
        conn.execute(
            "INSERT INTO deferred_jobs (id, kind, descriptor, status, enqueued_at)
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            params![id.to_string(), kind, descriptor_json, Utc::now().to_rfc3339()],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    fn mark_job_status(&self, id: Uuid, status: &str) {
        let conn = self.jobs_db.lock().unwrap();
        let _ = conn.execute(
            "UPDATE deferred_jobs SET status = ?1, completed_at = ?2 WHERE id = ?3",
            params![status, Utc::now().to_rfc3339(), id.to_string()],
        );
    }

    /// Enqueue a crew descriptor. Sanitizes every agent/task field up front
    /// so a malformed descriptor never reaches the durable table.
    pub async fn enqueue_crew(&self, descriptor: CrewDescriptor) -> Result<Uuid> {
        let descriptor = sanitize_crew_descriptor(descriptor)?;
        let id = Uuid::new_v4();
        let job_descriptor = JobDescriptor::Crew(descriptor);
        self.persist_job(id, "crew", &job_descriptor)?;
        self.sender
            .send(Job { id, descriptor: job_descriptor })
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Enqueue a flow descriptor.
    pub async fn enqueue_flow(&self, descriptor: FlowDescriptor) -> Result<Uuid> {
        let descriptor = sanitize_flow_descriptor(descriptor)?;
        let id = Uuid::new_v4();
        let job_descriptor = JobDescriptor::Flow(descriptor);
        self.persist_job(id, "flow", &job_descriptor)?;
        self.sender
            .send(Job { id, descriptor: job_descriptor })
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Drain the queue, running each job to completion in turn. Returns once
    /// every sender handle (including this bridge's own) has been dropped.
    pub async fn run(&self) {
        let mut receiver = match self.receiver.lock().unwrap().take() {
            Some(r) => r,
            None => return,
        };
        while let Some(job) = receiver.recv().await {
            self.process(job).await;
        }
    }

    async fn process(&self, job: Job) {
        match job.descriptor {
            JobDescriptor::Crew(descriptor) => match self.run_crew_job(&descriptor).await {
                Ok(result) => {
                    self.store_result(job.id, "crew_result", &result);
                    self.mark_job_status(job.id, "completed");
                    self.fire(DeferredEvent::CrewExecuted { job_id: job.id, result });
                }
                Err(e) => {
                    self.mark_job_status(job.id, "failed");
                    self.fire(DeferredEvent::CrewExecutionFailed {
                        job_id: job.id,
                        error: e.to_string(),
                    });
                }
            },
            JobDescriptor::Flow(descriptor) => match self.run_flow_job(&descriptor).await {
                Ok(result) => {
                    self.store_result(job.id, "flow_result", &result);
                    self.mark_job_status(job.id, "completed");
                    self.fire(DeferredEvent::FlowExecuted { job_id: job.id, result });
                }
                Err(e) => {
                    self.mark_job_status(job.id, "failed");
                    self.fire(DeferredEvent::FlowExecutionFailed {
                        job_id: job.id,
                        error: e.to_string(),
                    });
                }
            },
        }
    }

    fn store_result(&self, job_id: Uuid, tag: &str, result: &impl Serialize) {
        let key = format!("{tag}:{}:{}", job_id, Utc::now().to_rfc3339());
        let data = serde_json::to_value(result).unwrap_or(Value::Null);
        let metadata = serde_json::json!({"kind": tag, "job_id": job_id.to_string()});
        let _ = self.memory.store(&key, data, Some(metadata));
    }

    async fn run_crew_job(&self, descriptor: &CrewDescriptor) -> Result<crate::types::CrewResult> {
        let crew = self.rehydrate_crew(descriptor)?;
        Ok(crew.execute().await)
    }

    async fn run_flow_job(&self, descriptor: &FlowDescriptor) -> Result<crate::types::FlowResult> {
        let mut flow = self.rehydrate_flow(descriptor)?;
        Ok(flow.run().await)
    }

    fn rehydrate_tool(&self, id: &str) -> Result<Arc<dyn Tool>> {
        if !WHITELISTED_TOOL_IDS.contains(&id) {
            return Err(Error::ToolNotAllowed(id.to_string()));
        }
        self.tools
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ToolNotAllowed(id.to_string()))
    }

    fn rehydrate_agent(&self, descriptor: &AgentDescriptor) -> Result<Arc<Agent>> {
        let role = sanitize::sanitize("role", &descriptor.role, 255)?;
        let goal = sanitize::sanitize("goal", &descriptor.goal, 1000)?;
        let provider = self.providers.resolve(&descriptor.provider_name)?;
        let mut agent = Agent::new(role, goal, provider, self.memory.clone())?
            .with_config(AgentConfig {
                memory_search_limit: descriptor.memory_search_limit,
                ..AgentConfig::default()
            });
        for tool_id in &descriptor.tool_ids {
            agent = agent.with_tool(self.rehydrate_tool(tool_id)?);
        }
        Ok(Arc::new(agent))
    }

    fn rehydrate_task(descriptor: &TaskDescriptor) -> Result<Task> {
        let mut task = Task::new(descriptor.description.clone())?.with_streaming(descriptor.streaming);
        if let Some(role) = &descriptor.agent_role {
            task = task.with_agent_role(role.clone());
        }
        for (tool_name, input) in &descriptor.tool_inputs {
            task = task.with_tool_input(tool_name.clone(), input.clone());
        }
        for (key, value) in &descriptor.context {
            task = task.with_context(key.clone(), value.clone());
        }
        Ok(task)
    }

    fn rehydrate_crew(&self, descriptor: &CrewDescriptor) -> Result<Crew> {
        let agents = descriptor
            .agents
            .iter()
            .map(|a| self.rehydrate_agent(a))
            .collect::<Result<Vec<_>>>()?;
        let tasks = descriptor
            .tasks
            .iter()
            .map(Self::rehydrate_task)
            .collect::<Result<Vec<_>>>()?;
        let config = CrewConfig {
            execution_mode: if descriptor.config.parallel {
                ExecutionMode::Parallel
            } else {
                ExecutionMode::Sequential
            },
            max_retries: descriptor.config.max_retries,
            timeout: Duration::from_secs(descriptor.config.timeout_secs),
            max_parallel_tasks: descriptor.config.max_parallel_tasks,
        };
        Ok(Crew::new(tasks, agents).with_config(config))
    }

    fn rehydrate_step_kind(&self, descriptor: &StepKindDescriptor) -> Result<StepKind> {
        Ok(match descriptor {
            StepKindDescriptor::Crew(crew_descriptor) => StepKind::Crew(self.rehydrate_crew(crew_descriptor)?),
            StepKindDescriptor::Condition(condition) => StepKind::Condition(condition.rehydrate()),
            StepKindDescriptor::Delay { millis } => StepKind::Delay(Duration::from_millis(*millis)),
            StepKindDescriptor::Custom { handler_id } => StepKind::Custom(
                self.custom_handlers
                    .get(handler_id)
                    .cloned()
                    .ok_or_else(|| Error::StepHandlerMissing(handler_id.clone()))?,
            ),
        })
    }

    fn rehydrate_flow(&self, descriptor: &FlowDescriptor) -> Result<Flow> {
        let steps = descriptor
            .steps
            .iter()
            .map(|s| -> Result<FlowStep> {
                let mut step = FlowStep::new(s.name.clone(), self.rehydrate_step_kind(&s.kind)?)
                    .with_continue_on_error(s.continue_on_error);
                for condition in &s.conditions {
                    step = step.with_condition(condition.rehydrate());
                }
                Ok(step)
            })
            .collect::<Result<Vec<_>>>()?;

        let config = FlowConfig {
            max_steps: descriptor.config.max_steps,
            timeout: Duration::from_secs(descriptor.config.timeout_secs),
            continue_on_error: descriptor.config.continue_on_error,
        };
        let mut flow = Flow::new(steps).with_config(config);
        if let Some(name) = &descriptor.name {
            flow = flow.with_name(name.clone());
        }
        Ok(flow)
    }
}

fn sanitize_crew_descriptor(mut descriptor: CrewDescriptor) -> Result<CrewDescriptor> {
    for agent in &mut descriptor.agents {
        agent.role = sanitize::sanitize("role", &agent.role, 255)?;
        agent.goal = sanitize::sanitize("goal", &agent.goal, 1000)?;
        for tool_id in &agent.tool_ids {
            if !WHITELISTED_TOOL_IDS.contains(&tool_id.as_str()) {
                return Err(Error::ToolNotAllowed(tool_id.clone()));
            }
        }
    }
    for task in &mut descriptor.tasks {
        task.description = sanitize::sanitize("description", &task.description, 10_000)?;
    }
    Ok(descriptor)
}

fn sanitize_flow_descriptor(mut descriptor: FlowDescriptor) -> Result<FlowDescriptor> {
    for step in &mut descriptor.steps {
        if let StepKindDescriptor::Crew(crew_descriptor) = &mut step.kind {
            *crew_descriptor = sanitize_crew_descriptor(crew_descriptor.clone())?;
        }
    }
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerateOptions, GenerateResult, Mode, Provider};
    use crate::streaming::StreamChunk;
    use async_trait::async_trait;

    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }
        fn default_model(&self) -> &str {
            "echo-model"
        }
        fn supported_modes(&self) -> &[Mode] {
            &[Mode::Chat]
        }
        async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<GenerateResult> {
            Ok(GenerateResult {
                text: format!("echo: {prompt}"),
                usage: None,
            })
        }
        async fn stream(
            &self,
            _prompt: &str,
            _options: &GenerateOptions,
        ) -> Result<mpsc::Receiver<Result<StreamChunk>>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    fn bridge() -> DeferredBridge {
        let mut providers = ProviderRegistry::new("echo");
        providers.register(Arc::new(EchoProvider));
        DeferredBridge::new(
            ":memory:",
            Arc::new(Memory::in_memory().unwrap()),
            Arc::new(providers),
            HashMap::new(),
        )
        .unwrap()
    }

    fn crew_descriptor() -> CrewDescriptor {
        CrewDescriptor {
            agents: vec![AgentDescriptor {
                role: "writer".to_string(),
                goal: "write things".to_string(),
                provider_name: "echo".to_string(),
                tool_ids: Vec::new(),
                memory_search_limit: 5,
            }],
            tasks: vec![TaskDescriptor {
                description: "say hi".to_string(),
                agent_role: Some("writer".to_string()),
                ..Default::default()
            }],
            config: CrewConfigDescriptor::default(),
        }
    }

    #[tokio::test]
    async fn enqueued_crew_job_runs_and_fires_executed_event() {
        let bridge = Arc::new(bridge());
        let (tx, mut rx) = mpsc::channel(1);
        bridge.on_event(Arc::new(move |event: &DeferredEvent| {
            if let DeferredEvent::CrewExecuted { .. } = event {
                let _ = tx.try_send(());
            }
        }));

        let worker = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.run().await })
        };
        bridge.enqueue_crew(crew_descriptor()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        drop(bridge);
        let _ = worker.await;
    }

    #[tokio::test]
    async fn non_whitelisted_tool_id_is_rejected_at_enqueue() {
        let bridge = bridge();
        let mut descriptor = crew_descriptor();
        descriptor.agents[0].tool_ids.push("shell".to_string());
        let err = bridge.enqueue_crew(descriptor).await.unwrap_err();
        assert!(matches!(err, Error::ToolNotAllowed(_)));
    }

    #[tokio::test]
    async fn rehydration_re_sanitizes_dangerous_description() {
        let bridge = bridge();
        let mut descriptor = crew_descriptor();
        descriptor.tasks[0].description = "<script>alert(1)</script>".to_string();
        let err = bridge.enqueue_crew(descriptor).await.unwrap_err();
        assert!(matches!(err, Error::InputRejected(_)));
    }

    #[tokio::test]
    async fn flow_with_delay_and_condition_steps_round_trips() {
        let bridge = Arc::new(bridge());
        let flow_descriptor = FlowDescriptor {
            name: Some("onboarding".to_string()),
            steps: vec![
                FlowStepDescriptor {
                    name: "wait".to_string(),
                    kind: StepKindDescriptor::Delay { millis: 1 },
                    conditions: Vec::new(),
                    continue_on_error: false,
                },
                FlowStepDescriptor {
                    name: "run_crew".to_string(),
                    kind: StepKindDescriptor::Crew(crew_descriptor()),
                    conditions: Vec::new(),
                    continue_on_error: false,
                },
            ],
            config: FlowConfigDescriptor::default(),
        };

        let (tx, mut rx) = mpsc::channel(1);
        bridge.on_event(Arc::new(move |event: &DeferredEvent| {
            if let DeferredEvent::FlowExecuted { .. } = event {
                let _ = tx.try_send(());
            }
        }));
        let worker = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.run().await })
        };
        bridge.enqueue_flow(flow_descriptor).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        drop(bridge);
        let _ = worker.await;
    }
}
