//! Agent (C6).
//!
//! Binds a role/goal to a provider handle, a memory handle, and a tool
//! mapping, then runs the context-merge/recall/tool/generate/persist
//! execution algorithm. Grounded in the model crate's `agent::core::Agent`
//! (identity, role/goal, manual `Debug`) and
//! `agent::core::Agent::execute_task`'s shape, narrowed to a smaller,
//! execution-kernel-relevant field set — no knowledge sources,
//! guardrails, or code-execution modes, which belong to the surrounding
//! web-framework glue this kernel does not own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::llm::{GenerateOptions, Provider};
use crate::memory::Memory;
use crate::sanitize;
use crate::streaming::{ChunkCallback, StreamingEnvelope};
use crate::task::Task;
use crate::tokens::TokenUsageTracker;
use crate::tools::Tool;
use crate::types::Response;

const MAX_ROLE_LEN: usize = 255;
const MAX_GOAL_LEN: usize = 1000;

/// Prompt-assembly options (step 2-4 defaults).
#[derive(Debug, Clone)]
pub struct PromptConfig {
    pub include_memory: bool,
    pub include_tools: bool,
    pub max_context_length: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            include_memory: true,
            include_tools: true,
            max_context_length: 2000,
        }
    }
}

/// Recognized agent configuration options.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub memory_search_limit: usize,
    pub prompts: PromptConfig,
    pub generate: GenerateOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            memory_search_limit: 5,
            prompts: PromptConfig::default(),
            generate: GenerateOptions::default(),
        }
    }
}

/// A named role bound to a language-model backend, optional tools, and
/// memory (`Agent`).
pub struct Agent {
    pub id: Uuid,
    pub role: String,
    pub goal: String,
    pub provider: Arc<dyn Provider>,
    pub memory: Arc<Memory>,
    pub tools: HashMap<String, Arc<dyn Tool>>,
    pub context: HashMap<String, Value>,
    pub config: AgentConfig,
    pub tokens: Option<Arc<TokenUsageTracker>>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("goal", &self.goal)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Construct an agent, sanitizing `role`/`goal` (invariant:
    /// neither ever contains a dangerous pattern).
    pub fn new(
        role: impl Into<String>,
        goal: impl Into<String>,
        provider: Arc<dyn Provider>,
        memory: Arc<Memory>,
    ) -> Result<Self> {
        let role = sanitize::sanitize("role", &role.into(), MAX_ROLE_LEN)?;
        let goal = sanitize::sanitize("goal", &goal.into(), MAX_GOAL_LEN)?;
        Ok(Self {
            id: Uuid::new_v4(),
            role,
            goal,
            provider,
            memory,
            tools: HashMap::new(),
            context: HashMap::new(),
            config: AgentConfig::default(),
            tokens: None,
        })
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tokens(mut self, tokens: Arc<TokenUsageTracker>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Resolve effective context: agent.context overridden by task.context.
    fn effective_context(&self, task: &Task) -> HashMap<String, Value> {
        let mut merged = self.context.clone();
        merged.extend(task.context.clone());
        merged
    }

    /// Run every tool referenced by `task.tool_inputs`. A failing tool
    /// yields `{status:"error", message}` rather than aborting execution —
    /// this crate defines no built-in fatal tool, so every failure is
    /// captured into the result map instead of propagated.
    async fn run_tools(&self, task: &Task) -> HashMap<String, Value> {
        let mut results = HashMap::new();
        for (tool_name, input) in &task.tool_inputs {
            let outcome = match self.tools.get(tool_name) {
                Some(tool) => match tool.run(input.clone()).await {
                    Ok(value) => value,
                    Err(e) => serde_json::json!({"status": "error", "message": e.to_string()}),
                },
                None => serde_json::json!({"status": "error", "message": format!("tool not registered: {tool_name}")}),
            };
            results.insert(tool_name.clone(), outcome);
        }
        results
    }

    /// Recall memory relevant to `task.description`, capped at
    /// `memory_search_limit`.
    fn recall_memory(&self, task: &Task) -> Vec<Value> {
        self.memory
            .search(&task.description, self.config.memory_search_limit)
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.data)
            .collect()
    }

    /// Build the prompt: role, goal, context summary, task description.
    /// Length-capped at `max_context_length` by truncating the context
    /// section first.
    fn build_prompt(&self, task: &Task, context: &HashMap<String, Value>) -> String {
        let header = format!("Role: {}\nGoal: {}\n", self.role, self.goal);
        let mut context_summary = if context.is_empty() {
            String::new()
        } else {
            format!("Context: {}\n", serde_json::to_string(context).unwrap_or_default())
        };

        let budget = self.config.prompts.max_context_length;
        let fixed_len = header.chars().count() + task.description.chars().count() + "\nTask: ".chars().count();
        if fixed_len + context_summary.chars().count() > budget {
            let remaining = budget.saturating_sub(fixed_len);
            context_summary = context_summary.chars().take(remaining).collect();
        }

        format!("{header}{context_summary}Task: {}", task.description)
    }

    /// Persist `{prompt, response, agent_role, task.description}` under a
    /// generated key.
    fn persist_interaction(&self, prompt: &str, response: &str, task: &Task) {
        let key = format!("agent:{}:{}", self.role, Uuid::new_v4());
        let data = serde_json::json!({
            "prompt": prompt,
            "response": response,
            "agent_role": self.role,
            "task_description": task.description,
        });
        let _ = self.memory.store(&key, data, None);
    }

    async fn record_usage(&self, usage: Option<crate::llm::UsageTokens>) {
        if let (Some(tracker), Some(usage)) = (&self.tokens, usage) {
            let _ = tracker
                .atrack(
                    self.provider.name().to_string(),
                    self.config
                        .generate
                        .model
                        .clone()
                        .unwrap_or_else(|| self.provider.default_model().to_string()),
                    usage.prompt_tokens as i64,
                    usage.completion_tokens as i64,
                    None,
                    None,
                )
                .await;
        }
    }

    /// `handle(task) -> Response`.
    pub async fn handle(&self, task: &Task) -> Result<Response> {
        log::debug!("agent {} starting task {}", self.role, task.id);
        let start = Instant::now();
        let mut context = self.effective_context(task);

        if self.config.prompts.include_memory {
            let memories = self.recall_memory(task);
            if !memories.is_empty() {
                context.insert("memory".to_string(), Value::Array(memories));
            }
        }

        let mut tool_results = HashMap::new();
        if !task.tool_inputs.is_empty() {
            tool_results = self.run_tools(task).await;
            if self.config.prompts.include_tools {
                context.insert(
                    "tools".to_string(),
                    Value::Object(tool_results.clone().into_iter().collect()),
                );
            }
        }

        let prompt = self.build_prompt(task, &context);
        let result = match self.provider.generate(&prompt, &self.config.generate).await {
            Ok(result) => result,
            Err(e) => {
                log::warn!("agent {} task {} failed: {e}", self.role, task.id);
                return Err(e);
            }
        };
        self.record_usage(result.usage).await;
        self.persist_interaction(&prompt, &result.text, task);
        log::debug!(
            "agent {} finished task {} in {:.3}s",
            self.role,
            task.id,
            start.elapsed().as_secs_f64()
        );

        Ok(Response {
            content: result.text,
            agent_role: self.role.clone(),
            tool_results,
            execution_time: start.elapsed().as_secs_f64(),
        })
    }

    /// `stream(task, chunk_callback?) -> StreamingEnvelope` — same context
    /// and prompt assembly as `handle`, but the provider's chunk sequence is
    /// left for the caller to drain. Persistence into memory happens once
    /// the caller reifies the envelope (the envelope is single-consumer and
    /// the full response text isn't known until then).
    pub async fn stream(&self, task: &Task, chunk_callback: Option<ChunkCallback>) -> Result<StreamingEnvelope> {
        let mut context = self.effective_context(task);

        if self.config.prompts.include_memory {
            let memories = self.recall_memory(task);
            if !memories.is_empty() {
                context.insert("memory".to_string(), Value::Array(memories));
            }
        }

        let mut tool_results = HashMap::new();
        if !task.tool_inputs.is_empty() {
            tool_results = self.run_tools(task).await;
            if self.config.prompts.include_tools {
                context.insert(
                    "tools".to_string(),
                    Value::Object(tool_results.clone().into_iter().collect()),
                );
            }
        }

        let prompt = self.build_prompt(task, &context);
        let envelope = crate::llm::stream(
            self.provider.as_ref(),
            &prompt,
            &self.config.generate,
            self.role.clone(),
            chunk_callback,
        )
        .await?;
        Ok(envelope.with_tool_results(tool_results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerateResult, Mode};
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
                usage: Some(crate::llm::UsageTokens {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                }),
            })
        }

        async fn stream(
            &self,
            _prompt: &str,
            _options: &GenerateOptions,
        ) -> Result<mpsc::Receiver<Result<crate::streaming::StreamChunk>>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    fn test_agent() -> Agent {
        Agent::new(
            "researcher",
            "find things out",
            Arc::new(EchoProvider),
            Arc::new(Memory::in_memory().unwrap()),
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_dangerous_role() {
        let err = Agent::new(
            "<script>x</script>",
            "goal",
            Arc::new(EchoProvider),
            Arc::new(Memory::in_memory().unwrap()),
        )
        .unwrap_err();
        assert!(matches!(err, crate::error::Error::InputRejected(_)));
    }

    #[tokio::test]
    async fn handle_returns_response_and_persists_to_memory() {
        let agent = test_agent();
        let task = Task::new("say hi").unwrap();
        let response = agent.handle(&task).await.unwrap();
        assert_eq!(response.content, "echo: Role: researcher\nGoal: find things out\nTask: say hi");
        assert_eq!(response.agent_role, "researcher");

        let found = agent.memory.search("say hi", 10).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn handle_records_token_usage_when_tracker_present() {
        let tracker = Arc::new(TokenUsageTracker::in_memory().unwrap());
        let agent = test_agent().with_tokens(tracker.clone());
        let task = Task::new("say hi").unwrap();
        agent.handle(&task).await.unwrap();

        let summary = tracker.get_summary().unwrap();
        assert_eq!(summary.monthly_tokens, 15);
    }

    #[tokio::test]
    async fn handle_captures_unregistered_tool_error_without_propagating() {
        let agent = test_agent();
        let task = Task::new("search").unwrap().with_tool_input("nope", HashMap::new());
        let response = agent.handle(&task).await.unwrap();
        assert_eq!(response.tool_results["nope"]["status"], "error");
    }
}
