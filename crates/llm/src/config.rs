use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::client::{LlmRequest, LlmResponse, ModelClient, ModelError};
use crate::openai::OpenAiClient;
use crate::retry::{RetryConfig, RetryingClient};

const OLLAMA_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            api_url: None,
            temperature: Some(0.2),
            max_tokens: None,
            max_concurrent_requests: default_max_concurrent(),
            retry: RetryConfig::default(),
        }
    }
}

/// Caps the number of in-flight requests to the wrapped client.
pub struct SemaphoredClient {
    inner: Arc<dyn ModelClient>,
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl SemaphoredClient {
    pub fn new(inner: Arc<dyn ModelClient>, max_concurrent: usize) -> Self {
        Self {
            inner,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent.max(1))),
        }
    }
}

#[async_trait]
impl ModelClient for SemaphoredClient {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse, ModelError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| ModelError::request(format!("semaphore closed: {e}"), false))?;
        self.inner.chat(request).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Build the production client stack: provider adapter, retries, then a concurrency cap.
pub fn build_model_client(config: &LlmConfig) -> Result<Arc<dyn ModelClient>, ModelError> {
    let base: Box<dyn ModelClient> = match config.provider.as_str() {
        "openai" => Box::new(
            OpenAiClient::new(
                config.api_url.clone(),
                config.model.clone(),
                config.api_key.clone(),
            )
            .with_sampling(config.temperature, config.max_tokens),
        ),
        "ollama" => Box::new(
            OpenAiClient::new(
                Some(
                    config
                        .api_url
                        .clone()
                        .unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
                ),
                config.model.clone(),
                None,
            )
            .with_sampling(config.temperature, config.max_tokens),
        ),
        other => {
            return Err(ModelError::Config(format!("unknown LLM provider: {other}")));
        }
    };

    let retrying: Box<dyn ModelClient> = Box::new(RetryingClient::new(base, config.retry.clone()));
    let semaphored = SemaphoredClient::new(Arc::from(retrying), config.max_concurrent_requests);

    Ok(Arc::new(semaphored))
}
