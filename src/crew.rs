//! Crew scheduler (C7).
//!
//! An ordered sequence of tasks run by a role→agent mapping, in either
//! sequential (context-propagating) or parallel mode. Grounded in the model
//! crate's `crew::Crew` (identity, `agent_objects: HashMap<role, Agent>`
//! keyed registry, `kickoff`'s before/after shape), narrowed to a smaller
//! config surface (`execution_mode`, `max_retries`, `timeout`,
//! `max_parallel_tasks`) with a context-propagation contract between tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use uuid::Uuid;

use crate::agent::Agent;
use crate::error::{Error, Result};
use crate::streaming::StreamChunk;
use crate::task::Task;
use crate::types::{CrewResult, Response, TaskResult};

/// Task scheduling strategy within a crew (`execution_mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Sequential
    }
}

/// Recognized crew configuration options (Crew `config`).
#[derive(Debug, Clone)]
pub struct CrewConfig {
    pub execution_mode: ExecutionMode,
    pub max_retries: u32,
    pub timeout: Duration,
    /// Upper bound on concurrently in-flight tasks in parallel mode.
    pub max_parallel_tasks: usize,
}

impl Default for CrewConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Sequential,
            max_retries: 3,
            timeout: Duration::from_secs(60),
            max_parallel_tasks: 5,
        }
    }
}

/// An ordered set of tasks executed cooperatively by a role→agent mapping
/// (`Crew`).
pub struct Crew {
    pub id: Uuid,
    pub tasks: Vec<Task>,
    pub agents: HashMap<String, Arc<Agent>>,
    pub config: CrewConfig,
}

impl Crew {
    pub fn new(tasks: Vec<Task>, agents: Vec<Arc<Agent>>) -> Self {
        let agents = agents.into_iter().map(|a| (a.role.clone(), a)).collect();
        Self {
            id: Uuid::new_v4(),
            tasks,
            agents,
            config: CrewConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CrewConfig) -> Self {
        self.config = config;
        self
    }

    /// The agent assigned to `task`: its own `agent_role` if set, else the
    /// first agent in insertion order.
    fn resolve_agent(&self, task: &Task) -> Result<Arc<Agent>> {
        let role = task
            .agent_role
            .clone()
            .or_else(|| self.agents.keys().next().cloned())
            .ok_or_else(|| Error::AgentNotInCrew("crew has no agents".to_string()))?;
        self.agents
            .get(&role)
            .cloned()
            .ok_or_else(|| Error::AgentNotInCrew(role))
    }

    /// Non-streaming `execute()`. Honors `config.timeout` as a
    /// deadline for the whole run; on expiry the crew aborts with
    /// `CrewTimedOut`.
    pub async fn execute(&self) -> CrewResult {
        let start = Instant::now();
        let run = async {
            match self.config.execution_mode {
                ExecutionMode::Sequential => self.execute_sequential().await,
                ExecutionMode::Parallel => self.execute_parallel().await,
            }
        };

        match tokio::time::timeout(self.config.timeout, run).await {
            Ok(result) => result,
            Err(_) => CrewResult {
                results: Vec::new(),
                execution_time: start.elapsed().as_secs_f64(),
                success: false,
                error: Some(Error::CrewTimedOut(self.config.timeout).to_string()),
            },
        }
    }

    /// A failing task stops the run but keeps every already-completed
    /// task's `TaskResult` in the returned `results` rather than discarding
    /// them, matching `stream()`'s early-return shape below.
    async fn execute_sequential(&self) -> CrewResult {
        let start = Instant::now();
        let mut results = Vec::with_capacity(self.tasks.len());
        let mut tasks = self.tasks.clone();

        for index in 0..tasks.len() {
            let agent = match self.resolve_agent(&tasks[index]) {
                Ok(a) => a,
                Err(e) => {
                    return CrewResult {
                        results,
                        execution_time: start.elapsed().as_secs_f64(),
                        success: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            log::info!("crew {} starting task {index} on agent {}", self.id, agent.role);
            let task_start = Instant::now();
            let response = match agent.handle(&tasks[index]).await {
                Ok(r) => r,
                Err(e) => {
                    return CrewResult {
                        results,
                        execution_time: start.elapsed().as_secs_f64(),
                        success: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            log::info!(
                "crew {} finished task {index} in {:.3}s",
                self.id,
                task_start.elapsed().as_secs_f64()
            );
            let task_result = TaskResult {
                task_index: index,
                agent: agent.role.clone(),
                response: response.clone(),
                execution_time: task_start.elapsed().as_secs_f64(),
            };
            results.push(task_result);

            if let Some(next) = tasks.get_mut(index + 1) {
                next.context.insert("previous_response".to_string(), Value::String(response.content));
                next.context.insert("previous_agent".to_string(), Value::String(agent.role.clone()));
            }
        }

        CrewResult {
            results,
            execution_time: start.elapsed().as_secs_f64(),
            success: true,
            error: None,
        }
    }

    /// `execution_mode = parallel`: launch every task concurrently, bounded
    /// by `config.max_parallel_tasks` in-flight at a time, with no
    /// cross-task context linkage. Ordering of `results` by task index is
    /// preserved regardless of completion order. A failing task does not
    /// discard the `TaskResult`s of tasks that completed successfully —
    /// every other already-spawned task is still awaited and, on success,
    /// kept in `results`; the run is reported via `success = false` with
    /// the first failure's message.
    async fn execute_parallel(&self) -> CrewResult {
        let start = Instant::now();

        let mut agents = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            match self.resolve_agent(task) {
                Ok(a) => agents.push(a),
                Err(e) => {
                    return CrewResult {
                        results: Vec::new(),
                        execution_time: start.elapsed().as_secs_f64(),
                        success: false,
                        error: Some(e.to_string()),
                    }
                }
            }
        }

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.max_parallel_tasks.max(1)));
        let mut handles = Vec::with_capacity(self.tasks.len());
        for (index, (task, agent)) in self.tasks.iter().zip(agents).enumerate() {
            let task = task.clone();
            let semaphore = semaphore.clone();
            let crew_id = self.id;
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                log::info!("crew {crew_id} starting task {index} on agent {}", agent.role);
                let task_start = Instant::now();
                let response = agent.handle(&task).await;
                log::info!(
                    "crew {crew_id} finished task {index} in {:.3}s",
                    task_start.elapsed().as_secs_f64()
                );
                (index, agent.role.clone(), response, task_start.elapsed().as_secs_f64())
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok((index, role, Ok(response), elapsed)) => {
                    results.push((
                        index,
                        TaskResult {
                            task_index: index,
                            agent: role,
                            response,
                            execution_time: elapsed,
                        },
                    ));
                }
                Ok((_, _, Err(e), _)) => {
                    if first_error.is_none() {
                        first_error = Some(e.to_string());
                    }
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(Error::StepFailed(format!("task join failed: {e}")).to_string());
                    }
                }
            }
        }
        results.sort_by_key(|(index, _)| *index);

        CrewResult {
            results: results.into_iter().map(|(_, r)| r).collect(),
            execution_time: start.elapsed().as_secs_f64(),
            success: first_error.is_none(),
            error: first_error,
        }
    }

    /// Streaming `stream()` entry point: task 0 runs via
    /// `agent.stream`, re-yielding its chunks; the emitted callback wraps
    /// each backend chunk as `{task_index:0, chunk, is_streaming, is_complete}`,
    /// then as `{is_complete:true, response}`. Tasks 1..n run via
    /// `agent.handle`, each yielding one completion event.
    pub async fn stream<F>(&self, mut on_event: F) -> CrewResult
    where
        F: FnMut(Value) + Send,
    {
        let start = Instant::now();
        let mut results = Vec::with_capacity(self.tasks.len());
        let mut tasks = self.tasks.clone();

        for index in 0..tasks.len() {
            let agent = match self.resolve_agent(&tasks[index]) {
                Ok(a) => a,
                Err(e) => {
                    return CrewResult {
                        results,
                        execution_time: start.elapsed().as_secs_f64(),
                        success: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            let task_start = Instant::now();

            let response = if index == 0 {
                match self.stream_first_task(&agent, &tasks[index], &mut on_event).await {
                    Ok(r) => r,
                    Err(e) => {
                        return CrewResult {
                            results,
                            execution_time: start.elapsed().as_secs_f64(),
                            success: false,
                            error: Some(e.to_string()),
                        }
                    }
                }
            } else {
                match agent.handle(&tasks[index]).await {
                    Ok(r) => {
                        on_event(serde_json::json!({
                            "task_index": index,
                            "is_streaming": false,
                            "is_complete": true,
                            "response": r,
                        }));
                        r
                    }
                    Err(e) => {
                        return CrewResult {
                            results,
                            execution_time: start.elapsed().as_secs_f64(),
                            success: false,
                            error: Some(e.to_string()),
                        }
                    }
                }
            };

            results.push(TaskResult {
                task_index: index,
                agent: agent.role.clone(),
                response: response.clone(),
                execution_time: task_start.elapsed().as_secs_f64(),
            });

            if let Some(next) = tasks.get_mut(index + 1) {
                next.context.insert("previous_response".to_string(), Value::String(response.content));
                next.context.insert("previous_agent".to_string(), Value::String(agent.role.clone()));
            }
        }

        CrewResult {
            results,
            execution_time: start.elapsed().as_secs_f64(),
            success: true,
            error: None,
        }
    }

    async fn stream_first_task<F>(&self, agent: &Agent, task: &Task, on_event: &mut F) -> Result<Response>
    where
        F: FnMut(Value) + Send,
    {
        let mut envelope = agent.stream(task, None).await?;
        while let Some(result) = envelope.next_chunk().await {
            let chunk_ok: std::result::Result<(), crate::error::Error> = result;
            chunk_ok?;
            let stats = envelope.stats();
            on_event(serde_json::json!({
                "task_index": 0,
                "chunk": true,
                "is_streaming": true,
                "is_complete": false,
                "content_len": stats.content_length,
            }));
        }
        let response = envelope.to_response().await?;
        on_event(serde_json::json!({"task_index": 0, "is_complete": true, "response": response}));
        Ok(response)
    }
}

/// A single chunk forwarded while re-yielding task 0's stream (kept for
/// callers that want the typed form instead of the raw JSON event).
#[derive(Debug, Clone)]
pub struct CrewStreamChunk {
    pub task_index: usize,
    pub chunk: StreamChunk,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerateOptions, GenerateResult, Mode, Provider};
    use crate::memory::Memory;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

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

    fn agent(role: &str) -> Arc<Agent> {
        Arc::new(
            Agent::new(role, "goal", Arc::new(EchoProvider), Arc::new(Memory::in_memory().unwrap())).unwrap(),
        )
    }

    #[tokio::test]
    async fn sequential_execution_preserves_order_and_propagates_context() {
        let tasks = vec![
            Task::new("first").unwrap().with_agent_role("writer"),
            Task::new("second").unwrap().with_agent_role("writer"),
        ];
        let crew = Crew::new(tasks, vec![agent("writer")]);
        let result = crew.execute().await;
        assert!(result.success);
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.results[0].task_index, 0);
        assert_eq!(result.results[1].task_index, 1);
    }

    #[tokio::test]
    async fn missing_agent_role_fails_with_agent_not_in_crew() {
        let tasks = vec![Task::new("first").unwrap().with_agent_role("ghost")];
        let crew = Crew::new(tasks, vec![agent("writer")]);
        let result = crew.execute().await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("ghost"));
    }

    struct FailOnMatchProvider {
        fail_text: &'static str,
    }

    #[async_trait]
    impl Provider for FailOnMatchProvider {
        fn name(&self) -> &str {
            "flaky"
        }
        fn default_model(&self) -> &str {
            "flaky-model"
        }
        fn supported_modes(&self) -> &[Mode] {
            &[Mode::Chat]
        }
        async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<GenerateResult> {
            if prompt.contains(self.fail_text) {
                return Err(Error::ProviderRequestFailed {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
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

    #[tokio::test]
    async fn sequential_task_failure_keeps_already_completed_results() {
        let tasks = vec![
            Task::new("alpha").unwrap().with_agent_role("writer"),
            Task::new("beta").unwrap().with_agent_role("writer"),
            Task::new("gamma").unwrap().with_agent_role("writer"),
        ];
        let provider = Arc::new(FailOnMatchProvider { fail_text: "beta" });
        let writer = Arc::new(
            Agent::new("writer", "goal", provider, Arc::new(Memory::in_memory().unwrap())).unwrap(),
        );
        let crew = Crew::new(tasks, vec![writer]);
        let result = crew.execute().await;
        assert!(!result.success);
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.results[0].task_index, 0);
    }

    #[tokio::test]
    async fn parallel_task_failure_keeps_other_completed_results() {
        let tasks = vec![
            Task::new("alpha").unwrap().with_agent_role("writer"),
            Task::new("beta").unwrap().with_agent_role("writer"),
            Task::new("gamma").unwrap().with_agent_role("writer"),
        ];
        let provider = Arc::new(FailOnMatchProvider { fail_text: "beta" });
        let writer = Arc::new(
            Agent::new("writer", "goal", provider, Arc::new(Memory::in_memory().unwrap())).unwrap(),
        );
        let crew = Crew::new(tasks, vec![writer]).with_config(CrewConfig {
            execution_mode: ExecutionMode::Parallel,
            ..CrewConfig::default()
        });
        let result = crew.execute().await;
        assert!(!result.success);
        assert_eq!(result.results.len(), 2);
        let indices: Vec<usize> = result.results.iter().map(|r| r.task_index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[tokio::test]
    async fn parallel_execution_preserves_index_order() {
        let tasks = vec![
            Task::new("a").unwrap().with_agent_role("writer"),
            Task::new("b").unwrap().with_agent_role("writer"),
            Task::new("c").unwrap().with_agent_role("writer"),
        ];
        let crew = Crew::new(tasks, vec![agent("writer")]).with_config(CrewConfig {
            execution_mode: ExecutionMode::Parallel,
            ..CrewConfig::default()
        });
        let result = crew.execute().await;
        assert!(result.success);
        let indices: Vec<usize> = result.results.iter().map(|r| r.task_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    struct ConcurrencyTrackingProvider {
        inflight: Arc<std::sync::atomic::AtomicUsize>,
        observed_max: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl Provider for ConcurrencyTrackingProvider {
        fn name(&self) -> &str {
            "tracker"
        }
        fn default_model(&self) -> &str {
            "tracker-model"
        }
        fn supported_modes(&self) -> &[Mode] {
            &[Mode::Chat]
        }
        async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<GenerateResult> {
            use std::sync::atomic::Ordering;
            let current = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
            self.observed_max.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inflight.fetch_sub(1, Ordering::SeqCst);
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

    #[tokio::test]
    async fn parallel_execution_honors_max_parallel_tasks() {
        let inflight = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let observed_max = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let provider = Arc::new(ConcurrencyTrackingProvider {
            inflight: inflight.clone(),
            observed_max: observed_max.clone(),
        });
        let writer = Arc::new(
            Agent::new("writer", "goal", provider, Arc::new(Memory::in_memory().unwrap())).unwrap(),
        );
        let tasks: Vec<Task> = (0..6)
            .map(|i| Task::new(format!("task {i}")).unwrap().with_agent_role("writer"))
            .collect();
        let crew = Crew::new(tasks, vec![writer]).with_config(CrewConfig {
            execution_mode: ExecutionMode::Parallel,
            max_parallel_tasks: 2,
            ..CrewConfig::default()
        });
        let result = crew.execute().await;
        assert!(result.success);
        assert_eq!(result.results.len(), 6);
        assert!(observed_max.load(std::sync::atomic::Ordering::SeqCst) <= 2);
    }
}
