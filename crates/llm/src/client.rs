use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

/// Failure of a model invocation.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("model request failed: {message}")]
    Request { message: String, retryable: bool },

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("model configuration error: {0}")]
    Config(String),
}

impl ModelError {
    pub fn request(message: impl Into<String>, retryable: bool) -> Self {
        ModelError::Request {
            message: message.into(),
            retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Request { retryable: true, .. })
    }
}

/// The model-invocation capability consumed by agents.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse, ModelError>;

    fn model_name(&self) -> &str;

    /// Run `prompt` with `context` supplied as the system message.
    ///
    /// Blank completions are reported as [`ModelError::EmptyResponse`].
    async fn complete(&self, prompt: &str, context: &str) -> Result<String, ModelError> {
        let request = LlmRequest {
            system_prompt: (!context.trim().is_empty()).then(|| context.to_string()),
            messages: vec![ChatMessage::user(prompt)],
            ..Default::default()
        };
        let response = self.chat(request).await?;
        if response.content.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(response.content)
    }
}

#[async_trait]
impl ModelClient for Box<dyn ModelClient> {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse, ModelError> {
        (**self).chat(request).await
    }
    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}
