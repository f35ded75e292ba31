//! Anthropic-style chat dialect.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::llm::{GenerateOptions, GenerateResult, Mode, Provider, UsageTokens};
use crate::streaming::StreamChunk;

use super::util::{post_json, post_json_streaming, spawn_sse_stream};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct Anthropic {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl Anthropic {
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

    fn headers(&self) -> [(&'static str, String); 2] {
        [
            ("x-api-key", self.api_key.clone()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ]
    }

    fn body(&self, prompt: &str, options: &GenerateOptions, stream: bool) -> Value {
        json!({
            "model": options.model.clone().unwrap_or_else(|| self.default_model().to_string()),
            "max_tokens": options.max_tokens,
            "messages": [{"role": "user", "content": prompt}],
            "stream": stream,
        })
    }
}

fn extract_usage(json: &Value) -> Option<UsageTokens> {
    let usage = json.get("usage")?;
    Some(UsageTokens {
        prompt_tokens: usage["input_tokens"].as_u64().unwrap_or(0),
        completion_tokens: usage["output_tokens"].as_u64().unwrap_or(0),
    })
}

#[async_trait]
impl Provider for Anthropic {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        "claude-3-5-sonnet-20241022"
    }

    fn supported_modes(&self) -> &[Mode] {
        &[Mode::Chat]
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<GenerateResult> {
        let url = format!("{}/messages", self.base_url);
        let body = self.body(prompt, options, false);
        let headers = self.headers();
        let resp = post_json(&self.client, &url, &headers, &body, options.timeout).await?;
        let text = resp["content"][0]["text"].as_str().unwrap_or_default().to_string();
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
        let url = format!("{}/messages", self.base_url);
        let body = self.body(prompt, options, true);
        let headers = self.headers();
        let resp = post_json_streaming(&self.client, &url, &headers, &body, options.timeout).await?;
        Ok(spawn_sse_stream(resp, |json| {
            if json["type"] == "content_block_delta" {
                json["delta"]["text"].as_str().map(|s| s.to_string())
            } else {
                None
            }
        }))
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
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"text": "hi there"}],
                "usage": {"input_tokens": 4, "output_tokens": 6}
            })))
            .mount(&server)
            .await;

        let provider = Anthropic::new("key".to_string()).with_base_url(server.uri());
        let result = provider
            .generate("hello", &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(result.text, "hi there");
        assert_eq!(result.usage.unwrap().completion_tokens, 6);
    }
}
