//! OpenAI-chat, OpenAI-completion, and OpenAI-embedding dialects.
//!
//! Grounded in the model crate's `llms::providers::openai::OpenAICompletion`
//! (`build_request_body`/`api_base_url` shape) — that struct's `call`/
//! `acall` were left as stubs; this module completes the real HTTP request/
//! response handling.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::llm::{GenerateOptions, GenerateResult, Mode, Provider, UsageTokens};
use crate::streaming::StreamChunk;

use super::util::{post_json, post_json_streaming, single_chunk_channel, spawn_sse_stream};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

fn auth_header(api_key: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {api_key}"))
}

fn extract_chat_delta(json: &Value) -> Option<String> {
    json["choices"][0]["delta"]["content"]
        .as_str()
        .map(|s| s.to_string())
}

fn extract_usage(json: &Value) -> Option<UsageTokens> {
    let usage = json.get("usage")?;
    Some(UsageTokens {
        prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
    })
}

/// `POST /v1/chat/completions`.
pub struct OpenAIChat {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl OpenAIChat {
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
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "stream": stream,
        })
    }
}

#[async_trait]
impl Provider for OpenAIChat {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        "gpt-4o-mini"
    }

    fn supported_modes(&self) -> &[Mode] {
        &[Mode::Chat]
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<GenerateResult> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.body(prompt, options, false);
        let headers = [auth_header(&self.api_key)];
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
        let headers = [auth_header(&self.api_key)];
        let resp = post_json_streaming(&self.client, &url, &headers, &body, options.timeout).await?;
        Ok(spawn_sse_stream(resp, extract_chat_delta))
    }
}

/// `POST /v1/completions`.
pub struct OpenAICompletion {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl OpenAICompletion {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[async_trait]
impl Provider for OpenAICompletion {
    fn name(&self) -> &str {
        "openai-completion"
    }

    fn default_model(&self) -> &str {
        "gpt-3.5-turbo-instruct"
    }

    fn supported_modes(&self) -> &[Mode] {
        &[Mode::Completion]
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<GenerateResult> {
        let url = format!("{}/completions", self.base_url);
        let body = json!({
            "model": options.model.clone().unwrap_or_else(|| self.default_model().to_string()),
            "prompt": prompt,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
        });
        let headers = [auth_header(&self.api_key)];
        let resp = post_json(&self.client, &url, &headers, &body, options.timeout).await?;
        let text = resp["choices"][0]["text"].as_str().unwrap_or_default().to_string();
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
        // The OpenAI completions endpoint supports streaming; the extracted
        // delta path differs from chat (`choices[0].text` rather than
        // `delta.content`).
        let url = format!("{}/completions", self.base_url);
        let body = json!({
            "model": options.model.clone().unwrap_or_else(|| self.default_model().to_string()),
            "prompt": prompt,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "stream": true,
        });
        let headers = [auth_header(&self.api_key)];
        let resp = post_json_streaming(&self.client, &url, &headers, &body, options.timeout).await?;
        Ok(spawn_sse_stream(resp, |json| {
            json["choices"][0]["text"].as_str().map(|s| s.to_string())
        }))
    }
}

/// `POST /v1/embeddings`.
pub struct OpenAIEmbedding {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl OpenAIEmbedding {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[async_trait]
impl Provider for OpenAIEmbedding {
    fn name(&self) -> &str {
        "openai-embedding"
    }

    fn default_model(&self) -> &str {
        "text-embedding-3-small"
    }

    fn supported_modes(&self) -> &[Mode] {
        &[Mode::Embedding]
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<GenerateResult> {
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "model": options.model.clone().unwrap_or_else(|| self.default_model().to_string()),
            "input": prompt,
        });
        let headers = [auth_header(&self.api_key)];
        let resp = post_json(&self.client, &url, &headers, &body, options.timeout).await?;
        let embedding = resp["data"][0]["embedding"].clone();
        Ok(GenerateResult {
            text: embedding.to_string(),
            usage: extract_usage(&resp),
        })
    }

    async fn stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<mpsc::Receiver<Result<StreamChunk>>> {
        // Embeddings have no incremental representation; fall back to a
        // single whole-response chunk step 6.
        let result = self.generate(prompt, options).await?;
        Ok(single_chunk_channel(result.text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_extract_delta() {
        let json = json!({"choices": [{"delta": {"content": "hi"}}]});
        assert_eq!(extract_chat_delta(&json), Some("hi".to_string()));
    }

    #[test]
    fn extract_usage_from_response() {
        let json = json!({"usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}});
        let usage = extract_usage(&json).unwrap();
        assert_eq!(usage.prompt_tokens, 1);
        assert_eq!(usage.completion_tokens, 2);
    }

    #[tokio::test]
    async fn chat_generate_against_mock_server() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "R"}}],
                "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}
            })))
            .mount(&server)
            .await;

        let provider = OpenAIChat::new("test-key".to_string()).with_base_url(server.uri());
        let result = provider
            .generate("hello", &GenerateOptions::default())
            .await
            .unwrap();
        assert_eq!(result.text, "R");
        assert_eq!(result.usage.unwrap().prompt_tokens, 1);
    }

    #[tokio::test]
    async fn chat_generate_non_2xx_is_provider_request_failed() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let provider = OpenAIChat::new("test-key".to_string()).with_base_url(server.uri());
        let err = provider
            .generate("hello", &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProviderRequestFailed { status: 500, .. }));
    }
}
