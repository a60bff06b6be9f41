use async_trait::async_trait;

use super::types::ChatRequest;
use crate::core::errors::ApiError;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// provider name for logs (e.g. "groq")
    fn name(&self) -> &str;

    /// check if the provider is reachable with the configured credentials
    async fn health_check(&self) -> Result<bool, ApiError>;

    /// chat completion (non-streaming); returns the assistant text
    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, ApiError>;
}
