//! OpenAI-compatible providers (Ollama, OpenRouter, custom endpoints).
//!
//! These providers use the same API format as OpenAI, just with different
//! base URLs.

use crate::OpenAiProvider;

/// Ollama local API - OpenAI compatible
/// Default: http://localhost:11434/v1
pub fn ollama() -> OpenAiProvider {
    ollama_with_base("http://localhost:11434/v1")
}

/// Ollama with custom base URL
pub fn ollama_with_base(base_url: impl Into<String>) -> OpenAiProvider {
    // Ollama doesn't require API key, but we need to pass something
    OpenAiProvider::new("ollama", base_url)
}

/// OpenRouter API - OpenAI compatible, multi-model router
/// https://openrouter.ai/docs
pub fn openrouter(api_key: impl Into<String>) -> OpenAiProvider {
    OpenAiProvider::new(api_key, "https://openrouter.ai/api/v1")
}

/// Custom OpenAI-compatible endpoint
pub fn custom(api_key: impl Into<String>, base_url: impl Into<String>) -> OpenAiProvider {
    OpenAiProvider::new(api_key, base_url)
}
