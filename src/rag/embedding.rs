//! Embedding clients.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::core::config::settings::EmbeddingSettings;
use crate::core::errors::ApiError;

const MAX_CONCURRENT_BATCHES: usize = 4;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier recorded alongside stored vectors.
    fn model_name(&self) -> &str;

    /// One vector per input, in input order.
    async fn embed_documents(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError>;

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, ApiError>;
}

/// OpenAI-compatible `/v1/embeddings` client (text-embeddings-inference,
/// llama.cpp server, LM Studio and hosted APIs all speak it).
#[derive(Clone)]
pub struct HttpEmbedder {
    base_url: String,
    model: String,
    api_key: Option<String>,
    batch_size: usize,
    query_instruction: String,
    client: Client,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(settings: &EmbeddingSettings) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
            batch_size: settings.batch_size.max(1),
            query_instruction: settings.query_instruction.clone(),
            client,
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": batch,
        });

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let res = builder.send().await.map_err(ApiError::upstream)?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "Embedding request failed ({}): {}",
                status, text
            )));
        }

        let payload: EmbeddingResponse = res.json().await.map_err(ApiError::upstream)?;
        order_embeddings(payload.data, batch.len())
    }
}

/// Sorts by `index` when the server provides it and checks the count.
fn order_embeddings(mut items: Vec<EmbeddingItem>, expected: usize) -> Result<Vec<Vec<f32>>, ApiError> {
    if items.len() != expected {
        return Err(ApiError::Upstream(format!(
            "Embedding count mismatch: {} != {}",
            items.len(),
            expected
        )));
    }
    if items.iter().all(|item| item.index.is_some()) {
        items.sort_by_key(|item| item.index);
    }
    Ok(items.into_iter().map(|item| item.embedding).collect())
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let owned: Vec<Vec<String>> = inputs
            .chunks(self.batch_size)
            .map(<[String]>::to_vec)
            .collect();
        let batches: Vec<Vec<Vec<f32>>> = stream::iter(owned)
            .map(|batch| async move { self.embed_batch(&batch).await })
            .buffered(MAX_CONCURRENT_BATCHES)
            .try_collect()
            .await?;

        Ok(batches.into_iter().flatten().collect())
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, ApiError> {
        let input = vec![format!("{}{}", self.query_instruction, query)];
        self.embed_batch(&input)
            .await?
            .pop()
            .ok_or_else(|| ApiError::Upstream("Empty embedding response".to_string()))
    }
}
