//! OpenAI-compatible chat completion client.
//!
//! The screening loop talks to the model through [`CompletionService`], so
//! tests can drive it with an in-memory fake and any OpenAI-compatible
//! endpoint (OpenAI, DeepSeek, a local vLLM) works in production.

use crate::error::{OptionExt, Result, SlrError};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// LLM configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

/// One classification request: optional system instruction plus user prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    /// Ask for `response_format: json_object`
    pub json_mode: bool,
}

/// Answer text and the tokens it cost
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

/// Token usage tracking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// External text-classification service.
///
/// Every error is treated as retryable by the caller.
#[allow(async_fn_in_trait)]
pub trait CompletionService {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

/// OpenAI-compatible API response structures
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

/// HTTP client for `{base_url}/chat/completions`
pub struct ChatClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl ChatClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(SlrError::Config("LLM API key is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| SlrError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": request.user_prompt}));

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": 0
        });
        if request.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        body
    }
}

impl CompletionService for ChatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let api_url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        debug!(model = %self.config.model, json_mode = request.json_mode, "Sending LLM request");

        let response = self
            .client
            .post(&api_url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&self.request_body(request))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(SlrError::Api {
                code: status.as_u16() as i32,
                message: format!("LLM API error: {} - {}", status, error_text),
            });
        }

        let api_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| SlrError::Parse(format!("Failed to parse LLM response: {}", e)))?;

        parse_completion(api_response)
    }
}

fn parse_completion(api_response: ChatCompletionResponse) -> Result<Completion> {
    let usage = api_response
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    let content = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_parse("LLM response has no choices")?
        .message
        .content
        .unwrap_or_default();

    Ok(Completion { content, usage })
}
