//! Gemini dialect — `generateContent`, API key as a query parameter.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::llm::{GenerateOptions, GenerateResult, Mode, Provider, UsageTokens};
use crate::streaming::StreamChunk;

use super::util::{post_json, single_chunk_channel};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct Gemini {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl Gemini {
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

    fn body(&self, prompt: &str, options: &GenerateOptions) -> Value {
        json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": options.temperature,
                "maxOutputTokens": options.max_tokens,
            },
            "safetySettings": [],
        })
    }
}

fn extract_usage(json: &Value) -> Option<UsageTokens> {
    let usage = json.get("usageMetadata")?;
    Some(UsageTokens {
        prompt_tokens: usage["promptTokenCount"].as_u64().unwrap_or(0),
        completion_tokens: usage["candidatesTokenCount"].as_u64().unwrap_or(0),
    })
}

#[async_trait]
impl Provider for Gemini {
    fn name(&self) -> &str {
        "gemini"
    }

    fn default_model(&self) -> &str {
        "gemini-1.5-flash"
    }

    fn supported_modes(&self) -> &[Mode] {
        &[Mode::Chat]
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<GenerateResult> {
        let model = options.model.clone().unwrap_or_else(|| self.default_model().to_string());
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );
        let body = self.body(prompt, options);
        let resp = post_json(&self.client, &url, &[], &body, options.timeout).await?;
        let text = resp["candidates"][0]["content"]["parts"][0]["text"]
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
        // Gemini's streaming endpoint uses a separate `streamGenerateContent`
        // path with a different chunking shape; only the non-streaming
        // dialect is implemented for this backend, so we fall back to a
        // single whole-response chunk.
        let result = self.generate(prompt, options).await?;
        Ok(single_chunk_channel(result.text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generate_against_mock_server() {
        use wiremock::matchers::{method, path_regex};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/models/.*:generateContent$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "hi"}]}}],
                "usageMetadata": {"promptTokenCount": 1, "candidatesTokenCount": 2}
            })))
            .mount(&server)
            .await;

        let provider = Gemini::new("key".to_string()).with_base_url(server.uri());
        let result = provider
            .generate("hello", &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(result.text, "hi");
    }
}
