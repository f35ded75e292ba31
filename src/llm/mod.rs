//! Provider registry & client (C1).
//!
//! Each backend dialect is a polymorphic implementation of [`Provider`] over
//! the capability set {format-request, extract-response, extract-token-usage,
//! name, default-model, supported modes}. The registry resolves a provider
//! by a string driver name; unknown drivers fail with
//! `Error::ProviderNotConfigured`.
//!
//! Grounded in the model crate's `llm::LLM` (model-name inference, context
//! window tables) and `llms::providers::openai` (the `build_request_body`/
//! `api_base_url` shape), generalized here into a trait all eight dialects
//! implement, with real `reqwest` calls where the model crate left stubs.

pub mod providers;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::streaming::{ChunkCallback, StreamChunk, StreamingEnvelope};

/// Operating mode a provider request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Chat,
    Completion,
    Embedding,
}

/// Per-request generation options (agent.config defaults).
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub model: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: Option<f64>,
    pub stop: Option<Vec<String>>,
    pub timeout: Duration,
    pub mode: Mode,
    pub extra: HashMap<String, Value>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.7,
            max_tokens: 1000,
            top_p: None,
            stop: None,
            timeout: Duration::from_secs(60),
            mode: Mode::Chat,
            extra: HashMap::new(),
        }
    }
}

/// Token usage extracted from a provider response, handed to C5.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageTokens {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A completed, non-streamed generation result.
#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub text: String,
    pub usage: Option<UsageTokens>,
}

/// Capability abstraction every backend dialect implements. No inheritance
/// hierarchy — just this trait, per Design Note 9.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
    fn supported_modes(&self) -> &[Mode];

    fn is_mode_supported(&self, mode: Mode) -> bool {
        self.supported_modes().contains(&mode)
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<GenerateResult>;

    /// Stream a response. Providers without native streaming support fall
    /// back to a single chunk equal to the whole response.
    async fn stream(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<mpsc::Receiver<Result<StreamChunk>>>;
}

/// Resolves a configured driver name to a `Provider` implementation.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_name: String,
}

impl ProviderRegistry {
    pub fn new(default_name: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_name: default_name.into(),
        }
    }

    /// Build a registry with every built-in dialect registered, keyed by
    /// its canonical driver name, using API keys from `Config`.
    pub fn from_config(config: &crate::config::Config) -> Self {
        let mut registry = Self::new(config.default_provider.clone());
        let key = |name: &str| config.provider_api_keys.get(name).cloned().unwrap_or_default();

        registry.register(Arc::new(providers::openai::OpenAIChat::new(key("openai"))));
        registry.register(Arc::new(providers::openai::OpenAICompletion::new(key("openai"))));
        registry.register(Arc::new(providers::openai::OpenAIEmbedding::new(key("openai"))));
        registry.register(Arc::new(providers::anthropic::Anthropic::new(key("anthropic"))));
        registry.register(Arc::new(providers::ollama::Ollama::new()));
        registry.register(Arc::new(providers::grok::Grok::new(key("grok"))));
        registry.register(Arc::new(providers::gemini::Gemini::new(key("gemini"))));
        registry.register(Arc::new(providers::deepseek::DeepSeek::new(key("deepseek"))));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn resolve(&self, driver: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(driver)
            .cloned()
            .ok_or_else(|| Error::ProviderNotConfigured(driver.to_string()))
    }

    pub fn default_provider(&self) -> Result<Arc<dyn Provider>> {
        self.resolve(&self.default_name)
    }
}

/// Generate, reifying a whole response (the non-streaming C1 entry point).
pub async fn generate(
    provider: &dyn Provider,
    prompt: &str,
    options: &GenerateOptions,
) -> Result<GenerateResult> {
    provider.generate(prompt, options).await
}

/// Stream, wrapping the provider's chunk sequence in a [`StreamingEnvelope`].
pub async fn stream(
    provider: &dyn Provider,
    prompt: &str,
    options: &GenerateOptions,
    agent_role: impl Into<String>,
    callback: Option<ChunkCallback>,
) -> Result<StreamingEnvelope> {
    let receiver = provider.stream(prompt, options).await?;
    let mut envelope = StreamingEnvelope::new(receiver, agent_role);
    if let Some(cb) = callback {
        envelope = envelope.with_callback(cb);
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_driver_fails_with_provider_not_configured() {
        let registry = ProviderRegistry::new("openai");
        let err = registry.resolve("nonexistent").unwrap_err();
        assert!(matches!(err, Error::ProviderNotConfigured(_)));
    }

    #[test]
    fn mode_support_check() {
        let provider = providers::openai::OpenAIChat::new("key".to_string());
        assert!(provider.is_mode_supported(Mode::Chat));
        assert!(!provider.is_mode_supported(Mode::Embedding));
    }
}
