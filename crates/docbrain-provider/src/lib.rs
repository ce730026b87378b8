pub mod anthropic;
pub mod openai;
pub mod openai_compat;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;
pub use openai_compat::{custom, ollama, ollama_with_base, openrouter};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

impl LlmMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<LlmMessage>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl LlmRequest {
    pub fn simple(model: String, system: Option<String>, user_text: String) -> Self {
        Self {
            model,
            system,
            messages: vec![LlmMessage::user(user_text)],
            max_tokens: 1024,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

/// A chat-completion collaborator. The engine issues exactly one call per
/// analyzed message and must tolerate arbitrary text coming back; JSON
/// extraction is the caller's job.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse>;
    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================
// Provider Configuration
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Anthropic,
    OpenAI,
    Ollama,
    OpenRouter,
    /// Custom OpenAI-compatible endpoint
    Custom,
    /// Canned responses, for tests and offline runs
    Stub,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider ID (e.g., "openai", "my-ollama")
    pub id: String,
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, provider_type: ProviderType) -> Self {
        Self {
            id: id.into(),
            provider_type,
            api_key: None,
            base_url: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config.provider_type {
        ProviderType::Anthropic => {
            let key = config
                .api_key
                .as_ref()
                .ok_or_else(|| anyhow!("anthropic requires api_key"))?;
            let base_url = config
                .base_url
                .as_deref()
                .unwrap_or("https://api.anthropic.com");
            Arc::new(AnthropicProvider::new(key.clone(), base_url))
        }
        ProviderType::OpenAI => {
            let key = config
                .api_key
                .as_ref()
                .ok_or_else(|| anyhow!("openai requires api_key"))?;
            let base_url = config
                .base_url
                .as_deref()
                .unwrap_or("https://api.openai.com/v1");
            Arc::new(OpenAiProvider::new(key.clone(), base_url))
        }
        ProviderType::Ollama => {
            let base_url = config
                .base_url
                .as_deref()
                .unwrap_or("http://localhost:11434/v1");
            Arc::new(ollama_with_base(base_url))
        }
        ProviderType::OpenRouter => {
            let key = config
                .api_key
                .as_ref()
                .ok_or_else(|| anyhow!("openrouter requires api_key"))?;
            Arc::new(openrouter(key.clone()))
        }
        ProviderType::Custom => {
            let key = config
                .api_key
                .as_ref()
                .ok_or_else(|| anyhow!("custom provider requires api_key"))?;
            let base_url = config
                .base_url
                .as_ref()
                .ok_or_else(|| anyhow!("custom provider requires base_url"))?;
            Arc::new(custom(key.clone(), base_url.clone()))
        }
        ProviderType::Stub => Arc::new(StubProvider),
    };
    Ok(provider)
}

// ============================================================
// Provider Registry
// ============================================================

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(id.into(), provider);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn LlmProvider>> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("provider not found: {id}"))
    }

    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }
}

pub struct StubProvider;

#[async_trait]
impl LlmProvider for StubProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let user_text = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(LlmResponse {
            text: format!("[stub:{}] {}", request.model, user_text),
            input_tokens: None,
            output_tokens: None,
        })
    }
}
