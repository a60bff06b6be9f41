use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::provider::LlmProvider;
use super::types::ChatRequest;
use crate::core::config::settings::LlmSettings;
use crate::core::errors::ApiError;

/// Client for any `/v1/chat/completions` endpoint. Groq is the default target.
#[derive(Clone)]
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    pub fn from_settings(settings: &LlmSettings) -> Result<Self, ApiError> {
        let name = if settings.base_url.contains("groq.com") {
            "groq"
        } else {
            "openai-compatible"
        };
        Self::new(
            name,
            &settings.base_url,
            settings.api_key.clone(),
            Duration::from_secs(settings.timeout_secs),
        )
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, ApiError> {
        match &self.api_key {
            Some(key) => Ok(builder.bearer_auth(key)),
            None => Err(ApiError::BadRequest(format!(
                "No API key configured for {} (set llm.api_key or GROQ_API_KEY)",
                self.name
            ))),
        }
    }
}

fn build_chat_body(request: &ChatRequest, model_id: &str) -> Value {
    let mut body = json!({
        "model": model_id,
        "messages": request.messages,
        "stream": false,
    });

    if let Some(obj) = body.as_object_mut() {
        if let Some(t) = request.temperature {
            obj.insert("temperature".to_string(), json!(t));
        }
        if let Some(m) = request.max_tokens {
            obj.insert("max_tokens".to_string(), json!(m));
        }
    }
    body
}

fn parse_chat_content(payload: &Value) -> Result<String, ApiError> {
    payload["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ApiError::Upstream("Chat completion response had no content".to_string()))
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> Result<bool, ApiError> {
        let url = format!("{}/v1/models", self.base_url);
        let Ok(builder) = self.authorized(self.client.get(&url)) else {
            return Ok(false);
        };
        match builder.send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, ApiError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = build_chat_body(&request, model_id);

        tracing::debug!(
            "Sending chat completion to {} (model: {}, messages: {})",
            self.name,
            model_id,
            request.messages.len()
        );

        let res = self
            .authorized(self.client.post(&url))?
            .json(&body)
            .send()
            .await
            .map_err(ApiError::upstream)?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "{} chat error ({}): {}",
                self.name, status, text
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::upstream)?;
        parse_chat_content(&payload)
    }
}
