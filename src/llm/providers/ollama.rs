//! Ollama dialect — local inference server, JSON-per-line streaming.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::llm::{GenerateOptions, GenerateResult, Mode, Provider, UsageTokens};
use crate::streaming::StreamChunk;

use super::util::{post_json, post_json_streaming, spawn_jsonl_stream};

const DEFAULT_HOST: &str = "http://localhost:11434";

pub struct Ollama {
    client: reqwest::Client,
    host: String,
}

impl Ollama {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            host: std::env::var("OLLAMA_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    fn body(&self, prompt: &str, options: &GenerateOptions, stream: bool) -> Value {
        json!({
            "model": options.model.clone().unwrap_or_else(|| self.default_model().to_string()),
            "prompt": prompt,
            "stream": stream,
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens,
            }
        })
    }
}

impl Default for Ollama {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_usage(json: &Value) -> Option<UsageTokens> {
    let prompt = json.get("prompt_eval_count")?.as_u64().unwrap_or(0);
    let completion = json.get("eval_count").and_then(|v| v.as_u64()).unwrap_or(0);
    Some(UsageTokens {
        prompt_tokens: prompt,
        completion_tokens: completion,
    })
}

#[async_trait]
impl Provider for Ollama {
    fn name(&self) -> &str {
        "ollama"
    }

    fn default_model(&self) -> &str {
        "llama3"
    }

    fn supported_modes(&self) -> &[Mode] {
        &[Mode::Chat, Mode::Completion]
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<GenerateResult> {
        let url = format!("{}/api/generate", self.host);
        let body = self.body(prompt, options, false);
        let resp = post_json(&self.client, &url, &[], &body, options.timeout).await?;
        let text = resp["response"].as_str().unwrap_or_default().to_string();
        Ok(GenerateResult {
            text,
            usage: extract_usage(&resp),
        })
    }

    async fn stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<mpsc::Receiver<Result<StreamChunk>>> {
        let url = format!("{}/api/generate", self.host);
        let body = self.body(prompt, options, true);
        let resp = post_json_streaming(&self.client, &url, &[], &body, options.timeout).await?;
        Ok(spawn_jsonl_stream(
            resp,
            |json| json["response"].as_str().map(|s| s.to_string()),
            |json| json["done"].as_bool().unwrap_or(false),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generate_against_mock_server() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": "hi",
                "prompt_eval_count": 2,
                "eval_count": 3,
                "done": true
            })))
            .mount(&server)
            .await;

        let provider = Ollama::new().with_host(server.uri());
        let result = provider
            .generate("hello", &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(result.text, "hi");
        assert_eq!(result.usage.unwrap().prompt_tokens, 2);
    }
}
