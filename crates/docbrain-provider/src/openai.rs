use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{LlmMessage, LlmProvider, LlmRequest, LlmResponse};

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn to_api_request(request: LlmRequest) -> ApiRequest {
        let mut messages: Vec<LlmMessage> = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system {
            messages.push(LlmMessage {
                role: "system".into(),
                content: system,
            });
        }
        messages.extend(request.messages);
        ApiRequest {
            model: request.model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.api_base);
        let payload = Self::to_api_request(request);

        let resp = match self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Err(anyhow!("openai api error (timeout): request timed out after 60s"));
            }
            Err(e) => return Err(anyhow!("openai api error (connect): {e}")),
        };

        let status = resp.status();
        if status != StatusCode::OK {
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&text)
                .ok()
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(anyhow!("openai api error ({}): {message}", status.as_u16()));
        }

        let body: ApiResponse = resp.json().await?;
        let text = body
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(LlmResponse {
            text,
            input_tokens: body.usage.as_ref().map(|u| u.prompt_tokens),
            output_tokens: body.usage.as_ref().map(|u| u.completion_tokens),
        })
    }
}

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<LlmMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Deserialize)]
struct ApiChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}
