//! Grok dialect — OpenAI-chat-shaped, fixed system message, x.ai host.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::llm::{GenerateOptions, GenerateResult, Mode, Provider, UsageTokens};
use crate::streaming::StreamChunk;

use super::util::{post_json, post_json_streaming, spawn_sse_stream};

const DEFAULT_BASE_URL: &str = "https://api.x.ai/v1";
const SYSTEM_MESSAGE: &str = "You are Grok, a helpful AI assistant.";

pub struct Grok {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl Grok {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn body(&self, prompt: &str, options: &GenerateOptions, stream: bool) -> Value {
        json!({
            "model": options.model.clone().unwrap_or_else(|| self.default_model().to_string()),
            "messages": [
                {"role": "system", "content": SYSTEM_MESSAGE},
                {"role": "user", "content": prompt}
            ],
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "stream": stream,
        })
    }
}

fn extract_usage(json: &Value) -> Option<UsageTokens> {
    let usage = json.get("usage")?;
    Some(UsageTokens {
        prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
    })
}

#[async_trait]
impl Provider for Grok {
    fn name(&self) -> &str {
        "grok"
    }

    fn default_model(&self) -> &str {
        "grok-2-latest"
    }

    fn supported_modes(&self) -> &[Mode] {
        &[Mode::Chat]
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<GenerateResult> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.body(prompt, options, false);
        let headers = [("Authorization", format!("Bearer {}", self.api_key))];
        let resp = post_json(&self.client, &url, &headers, &body, options.timeout).await?;
        let text = resp["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
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
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.body(prompt, options, true);
        let headers = [("Authorization", format!("Bearer {}", self.api_key))];
        let resp = post_json_streaming(&self.client, &url, &headers, &body, options.timeout).await?;
        Ok(spawn_sse_stream(resp, |json| {
            json["choices"][0]["delta"]["content"].as_str().map(|s| s.to_string())
        }))
    }
}
