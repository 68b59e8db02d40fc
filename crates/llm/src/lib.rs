//! Model invocation for Delve agents.
//!
//! Agents only see the [`ModelClient`] contract: `complete(prompt, context)`
//! returning text or a [`ModelError`]. The adapters here wrap an
//! OpenAI-compatible chat endpoint with retries and a concurrency cap.

pub mod client;
pub mod config;
pub mod openai;
pub mod retry;

pub use client::{ChatMessage, LlmRequest, LlmResponse, ModelClient, ModelError, Role, TokenUsage};
pub use config::{build_model_client, LlmConfig, SemaphoredClient};
pub use openai::OpenAiClient;
pub use retry::{RetryConfig, RetryingClient};
