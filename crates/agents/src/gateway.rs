//! Tool gateway: the agents' single door to external search capabilities.

use std::time::Duration;

use async_trait::async_trait;
use delve_llm::RetryConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// A tool call that produced no output.
#[derive(Debug, Clone, Error)]
#[error("tool '{tool}' failed: {message}")]
pub struct ToolError {
    pub tool: String,
    pub message: String,
    pub retryable: bool,
}

impl ToolError {
    pub fn new(tool: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            tool: tool.into(),
            message: message.into(),
            retryable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolHit {
    pub source: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    #[serde(default)]
    pub hits: Vec<ToolHit>,
}

/// Uniform adapter over external search and fact tools.
#[async_trait]
pub trait ToolGateway: Send + Sync {
    async fn invoke(&self, tool: &str, query: &str) -> Result<ToolOutput, ToolError>;
}

#[async_trait]
impl ToolGateway for Box<dyn ToolGateway> {
    async fn invoke(&self, tool: &str, query: &str) -> Result<ToolOutput, ToolError> {
        (**self).invoke(tool, query).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// URL accepting `POST {"tool", "query"}`
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Tools each researcher consults, in order
    #[serde(default = "default_tools")]
    pub tools: Vec<String>,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_tools() -> Vec<String> {
    vec!["web_search".into(), "academic_search".into()]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: default_timeout_ms(),
            tools: default_tools(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Serialize)]
struct GatewayRequest<'a> {
    tool: &'a str,
    query: &'a str,
}

/// Gateway reached over HTTP.
///
/// Transport errors, 429 and 5xx responses are retryable.
pub struct HttpToolGateway {
    endpoint: String,
    timeout: Duration,
    http_client: reqwest::Client,
}

impl HttpToolGateway {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
            http_client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ToolGateway for HttpToolGateway {
    async fn invoke(&self, tool: &str, query: &str) -> Result<ToolOutput, ToolError> {
        debug!(tool, query, endpoint = %self.endpoint, "Invoking tool");

        let response = self
            .http_client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&GatewayRequest { tool, query })
            .send()
            .await
            .map_err(|e| ToolError::new(tool, format!("request failed: {e}"), true))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let retryable =
                status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            return Err(ToolError::new(tool, format!("gateway error {status}: {body}"), retryable));
        }

        response
            .json::<ToolOutput>()
            .await
            .map_err(|e| ToolError::new(tool, format!("invalid gateway response: {e}"), false))
    }
}

/// Retries retryable tool errors with exponential backoff.
pub struct RetryingGateway<G: ToolGateway> {
    inner: G,
    config: RetryConfig,
}

impl<G: ToolGateway> RetryingGateway<G> {
    pub fn new(inner: G, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl<G: ToolGateway> ToolGateway for RetryingGateway<G> {
    async fn invoke(&self, tool: &str, query: &str) -> Result<ToolOutput, ToolError> {
        let mut attempt = 0;
        loop {
            match self.inner.invoke(tool, query).await {
                Ok(output) => return Ok(output),
                Err(e) if e.retryable && attempt < self.config.max_retries => {
                    let delay = self.config.delay_for(attempt);
                    warn!(
                        tool,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying tool call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
