//! Ingestion and question answering over a session's document index.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::chunker::NodeParser;
use super::embedding::{Embedder, HttpEmbedder};
use super::rerank::{reranker_from_settings, Reranker};
use super::sqlite::SqliteVectorStore;
use super::store::{ScoredNode, VectorStore};
use super::synthesizer::{clean_output, CompactSynthesizer};
use crate::core::config::RagSettings;
use crate::core::errors::ApiError;
use crate::documents::DocumentLoader;
use crate::llm::{LlmProvider, OpenAiCompatProvider};

const EXCERPT_CHARS: usize = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Success,
    NoDocuments,
}

impl IngestStatus {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::NoDocuments => "No documents found.",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub status: IngestStatus,
    pub message: String,
    pub documents: usize,
    pub nodes: usize,
}

impl IngestReport {
    fn new(status: IngestStatus, documents: usize, nodes: usize) -> Self {
        Self {
            status,
            message: status.message().to_string(),
            documents,
            nodes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub file_name: String,
    pub score: f32,
    pub excerpt: String,
}

impl From<&ScoredNode> for SourceRef {
    fn from(scored: &ScoredNode) -> Self {
        let text = scored.node.text.trim();
        let excerpt = match text.char_indices().nth(EXCERPT_CHARS) {
            Some((cut, _)) => format!("{}...", &text[..cut]),
            None => text.to_string(),
        };
        Self {
            file_name: scored.node.file_name().to_string(),
            score: scored.score,
            excerpt,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub answer: String,
    pub model_id: String,
    pub sources: Vec<SourceRef>,
}

pub struct RagPipeline {
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
    llm: Arc<dyn LlmProvider>,
    settings: RagSettings,
}

impl RagPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
        llm: Arc<dyn LlmProvider>,
        settings: RagSettings,
    ) -> Self {
        Self {
            embedder,
            reranker,
            llm,
            settings,
        }
    }

    /// Wires the HTTP-backed embedder, reranker and LLM client from settings.
    pub fn from_settings(settings: RagSettings) -> Result<Self, ApiError> {
        let embedder = Arc::new(HttpEmbedder::new(&settings.embedding)?);
        let reranker: Option<Arc<dyn Reranker>> =
            reranker_from_settings(&settings.reranker)?.map(Arc::from);
        let llm = Arc::new(OpenAiCompatProvider::from_settings(&settings.llm)?);
        tracing::info!(
            "RAG pipeline ready (embedding: {}, llm: {}, reranker: {})",
            settings.embedding.model,
            llm.name(),
            reranker
                .as_ref()
                .map(|r| r.name().to_string())
                .unwrap_or_else(|| "off".to_string())
        );
        Ok(Self::new(embedder, reranker, llm, settings))
    }

    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    pub fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    async fn open_store(&self, db_dir: &Path) -> Result<SqliteVectorStore, ApiError> {
        SqliteVectorStore::open(db_dir, &self.settings.collection, self.embedder.model_name()).await
    }

    /// Loads every supported file under `files_dir`, splits, embeds and
    /// indexes the nodes into the store at `db_dir`.
    pub async fn process_documents(
        &self,
        files_dir: &Path,
        db_dir: &Path,
    ) -> Result<IngestReport, ApiError> {
        let documents = DocumentLoader::new(true).load_directory(files_dir).await?;
        if documents.is_empty() {
            tracing::info!("No documents found in {}", files_dir.display());
            return Ok(IngestReport::new(IngestStatus::NoDocuments, 0, 0));
        }

        let parser = NodeParser::from_settings(&self.settings.chunking);
        let nodes = parser.parse(&documents, self.embedder.as_ref()).await?;
        if nodes.is_empty() {
            tracing::info!("Documents in {} contained no text", files_dir.display());
            return Ok(IngestReport::new(IngestStatus::NoDocuments, documents.len(), 0));
        }

        let texts: Vec<String> = nodes.iter().map(|n| n.text.clone()).collect();
        let embeddings = self.embedder.embed_documents(&texts).await?;
        if embeddings.len() != nodes.len() {
            return Err(ApiError::Upstream(format!(
                "Expected {} embeddings, got {}",
                nodes.len(),
                embeddings.len()
            )));
        }

        let store = self.open_store(db_dir).await?;
        let indexed = store.upsert(nodes.into_iter().zip(embeddings).collect()).await?;

        tracing::info!(
            "Indexed {} nodes from {} documents into '{}'",
            indexed,
            documents.len(),
            store.collection()
        );
        Ok(IngestReport::new(IngestStatus::Success, documents.len(), indexed))
    }

    /// Answers `query_text` from the store at `db_dir` using `model_id`.
    pub async fn query(
        &self,
        query_text: &str,
        db_dir: &Path,
        model_id: &str,
    ) -> Result<QueryAnswer, ApiError> {
        let query_text = query_text.trim();
        if query_text.is_empty() {
            return Err(ApiError::BadRequest("Query must not be empty".to_string()));
        }

        let store = self.open_store(db_dir).await?;
        if store.count().await? == 0 {
            return Err(ApiError::Conflict(
                "Documents have not been processed".to_string(),
            ));
        }

        let query_embedding = self.embedder.embed_query(query_text).await?;
        let retrieved = store
            .query(&query_embedding, self.settings.similarity_top_k)
            .await?;
        tracing::debug!("Retrieved {} candidate nodes", retrieved.len());

        let nodes = self.rerank(query_text, retrieved).await;

        let synthesizer = CompactSynthesizer::new(
            self.settings.llm.context_window,
            self.settings.llm.temperature,
            self.settings.llm.max_tokens,
        );
        let raw = synthesizer
            .synthesize(self.llm.as_ref(), model_id, query_text, &nodes)
            .await?;

        Ok(QueryAnswer {
            answer: clean_output(&raw),
            model_id: model_id.to_string(),
            sources: nodes.iter().map(SourceRef::from).collect(),
        })
    }

    async fn rerank(&self, query_text: &str, retrieved: Vec<ScoredNode>) -> Vec<ScoredNode> {
        let top_n = self.settings.reranker.top_n;
        let Some(reranker) = &self.reranker else {
            return retrieved;
        };

        let fallback = retrieved.clone();
        match reranker.rerank(query_text, retrieved, top_n).await {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::warn!("Rerank with {} failed, using retrieval order: {}", reranker.name(), e);
                let mut nodes = fallback;
                nodes.truncate(top_n);
                nodes
            }
        }
    }
}
