//! Cross-module: crew context propagation into downstream tasks.

use std::sync::Arc;

use agentkit::agent::Agent;
use agentkit::crew::Crew;
use agentkit::error::Result;
use agentkit::llm::{GenerateOptions, GenerateResult, Mode, Provider};
use agentkit::memory::Memory;
use agentkit::task::Task;
use async_trait::async_trait;
use tokio::sync::mpsc;

struct RecordingProvider;

#[async_trait]
impl Provider for RecordingProvider {
    fn name(&self) -> &str {
        "recording"
    }
    fn default_model(&self) -> &str {
        "recording-model"
    }
    fn supported_modes(&self) -> &[Mode] {
        &[Mode::Chat]
    }
    async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<GenerateResult> {
        Ok(GenerateResult {
            text: prompt.to_string(),
            usage: None,
        })
    }
    async fn stream(
        &self,
        _prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<mpsc::Receiver<Result<agentkit::streaming::StreamChunk>>> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}

#[tokio::test]
async fn second_task_prompt_contains_first_tasks_response() {
    let agent = Arc::new(
        Agent::new(
            "writer",
            "goal",
            Arc::new(RecordingProvider),
            Arc::new(Memory::in_memory().unwrap()),
        )
        .unwrap(),
    );

    let tasks = vec![
        Task::new("first task").unwrap().with_agent_role("writer"),
        Task::new("second task").unwrap().with_agent_role("writer"),
    ];

    let crew = Crew::new(tasks, vec![agent]);
    let result = crew.execute().await;

    assert!(result.success);
    assert_eq!(result.results.len(), 2);
    // RecordingProvider echoes the built prompt back as its response, so the
    // second task's response contains the first task's response text,
    // proving the prompt assembly step read `previous_response` back out of
    // context.
    assert!(result.results[1].response.content.contains("first task"));
}
