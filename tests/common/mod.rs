#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use docqa_backend::core::config::RagSettings;
use docqa_backend::core::errors::ApiError;
use docqa_backend::llm::{ChatRequest, LlmProvider};
use docqa_backend::rag::{Embedder, LexicalReranker, RagPipeline};

const TOPICS: [&str; 4] = ["rent", "pet", "parking", "deposit"];

/// Embeds text as a bag of topic words, with one extra dimension for
/// everything else so no vector is all zeros.
pub struct TopicEmbedder;

pub fn topic_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v: Vec<f32> = TOPICS
        .iter()
        .map(|t| if lower.contains(t) { 1.0 } else { 0.0 })
        .collect();
    v.push(if v.iter().all(|x| *x == 0.0) { 1.0 } else { 0.0 });
    v
}

#[async_trait]
impl Embedder for TopicEmbedder {
    fn model_name(&self) -> &str {
        "topic-test"
    }

    async fn embed_documents(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        Ok(inputs.iter().map(|t| topic_vector(t)).collect())
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, ApiError> {
        Ok(topic_vector(query))
    }
}

/// Same vectors as `TopicEmbedder` under another model name.
pub struct VersionedEmbedder(pub &'static str);

#[async_trait]
impl Embedder for VersionedEmbedder {
    fn model_name(&self) -> &str {
        self.0
    }

    async fn embed_documents(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        Ok(inputs.iter().map(|t| topic_vector(t)).collect())
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, ApiError> {
        Ok(topic_vector(query))
    }
}

/// Answers with the first context line that shares a topic with the query,
/// wrapped in a reasoning block the pipeline must strip.
pub struct GroundedLlm {
    pub calls: Mutex<Vec<(String, String)>>,
}

impl GroundedLlm {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LlmProvider for GroundedLlm {
    fn name(&self) -> &str {
        "grounded-test"
    }

    async fn health_check(&self) -> Result<bool, ApiError> {
        Ok(true)
    }

    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, ApiError> {
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.calls
            .lock()
            .unwrap()
            .push((model_id.to_string(), prompt.clone()));

        let query = prompt
            .lines()
            .find_map(|l| l.strip_prefix("Query: "))
            .unwrap_or_default()
            .to_lowercase();
        let topic = TOPICS.iter().find(|t| query.contains(*t));

        let answer = topic
            .and_then(|t| {
                prompt
                    .split(|c: char| c == '\n' || c == '.')
                    .map(str::trim)
                    .find(|s| s.to_lowercase().contains(t) && !s.starts_with("Query"))
            })
            .unwrap_or("Not stated in the documents");

        Ok(format!("<think>\nlooking for the answer\n</think>\n{}", answer))
    }
}

pub fn test_pipeline() -> (RagPipeline, Arc<GroundedLlm>) {
    test_pipeline_with(Arc::new(TopicEmbedder), RagSettings::default())
}

pub fn test_pipeline_with(
    embedder: Arc<dyn Embedder>,
    settings: RagSettings,
) -> (RagPipeline, Arc<GroundedLlm>) {
    let llm = Arc::new(GroundedLlm::new());
    let pipeline = RagPipeline::new(
        embedder,
        Some(Arc::new(LexicalReranker::default())),
        llm.clone(),
        settings,
    );
    (pipeline, llm)
}
