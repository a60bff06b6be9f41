//! Typed view over the merged configuration.
//!
//! Every key is optional in `config.yml`; missing or mistyped values fall back
//! to the defaults below.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ModelOption;

pub const DEFAULT_EMBEDDING_MODEL: &str = "BAAI/bge-large-en-v1.5";
pub const DEFAULT_RERANKER_MODEL: &str = "BAAI/bge-reranker-large";
pub const DEFAULT_COLLECTION: &str = "user_data";
const BGE_QUERY_INSTRUCTION: &str = "Represent this sentence for searching relevant passages: ";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub batch_size: usize,
    pub query_instruction: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
    /// Model context size in tokens; the synthesizer packs context to fit it.
    pub context_window: usize,
    /// Overrides the built-in model list when non-empty.
    pub models: Vec<ModelOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerSettings {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub model: String,
    pub top_n: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitterKind {
    Semantic,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingSettings {
    pub splitter: SplitterKind,
    pub buffer_size: usize,
    pub breakpoint_percentile_threshold: f64,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagSettings {
    pub embedding: EmbeddingSettings,
    pub llm: LlmSettings,
    pub reranker: RerankerSettings,
    pub chunking: ChunkingSettings,
    pub similarity_top_k: usize,
    pub collection: String,
    pub max_upload_bytes: usize,
    pub history_limit: i64,
    pub max_concurrent_jobs: usize,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self::from_config(&Value::Null)
    }
}

impl RagSettings {
    pub fn from_config(config: &Value) -> Self {
        let section = |name: &str| config.get(name).cloned().unwrap_or(Value::Null);
        let embedding = section("embedding");
        let llm = section("llm");
        let reranker = section("reranker");
        let rag = section("rag");
        let app = section("app");

        let splitter = match str_or(&rag, "splitter", "semantic").as_str() {
            "fixed" => SplitterKind::Fixed,
            _ => SplitterKind::Semantic,
        };

        let models = llm
            .get("models")
            .cloned()
            .and_then(|v| serde_json::from_value::<Vec<ModelOption>>(v).ok())
            .unwrap_or_default();

        let llm_api_key = opt_str(&llm, "api_key").or_else(|| {
            std::env::var("GROQ_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty())
        });

        Self {
            embedding: EmbeddingSettings {
                base_url: str_or(&embedding, "base_url", "http://127.0.0.1:8090"),
                model: str_or(&embedding, "model", DEFAULT_EMBEDDING_MODEL),
                api_key: opt_str(&embedding, "api_key"),
                batch_size: usize_or(&embedding, "batch_size", 32).max(1),
                query_instruction: str_or(&embedding, "query_instruction", BGE_QUERY_INSTRUCTION),
                timeout_secs: u64_or(&embedding, "timeout_secs", 60),
            },
            llm: LlmSettings {
                base_url: str_or(&llm, "base_url", "https://api.groq.com/openai"),
                api_key: llm_api_key,
                temperature: llm
                    .get("temperature")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.1),
                max_tokens: llm
                    .get("max_tokens")
                    .and_then(Value::as_u64)
                    .map(|v| v as u32),
                timeout_secs: u64_or(&llm, "timeout_secs", 120),
                context_window: usize_or(&llm, "context_window", 8192),
                models,
            },
            reranker: RerankerSettings {
                enabled: reranker
                    .get("enabled")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
                base_url: opt_str(&reranker, "base_url"),
                model: str_or(&reranker, "model", DEFAULT_RERANKER_MODEL),
                top_n: usize_or(&reranker, "top_n", 5).max(1),
                timeout_secs: u64_or(&reranker, "timeout_secs", 30),
            },
            chunking: ChunkingSettings {
                splitter,
                buffer_size: usize_or(&rag, "buffer_size", 1),
                breakpoint_percentile_threshold: rag
                    .get("breakpoint_percentile_threshold")
                    .and_then(Value::as_f64)
                    .unwrap_or(95.0),
                chunk_size: usize_or(&rag, "chunk_size", 1024).max(1),
                chunk_overlap: usize_or(&rag, "chunk_overlap", 200),
            },
            similarity_top_k: usize_or(&rag, "similarity_top_k", 10).max(1),
            collection: str_or(&rag, "collection", DEFAULT_COLLECTION),
            max_upload_bytes: usize_or(&app, "max_upload_bytes", 50 * 1024 * 1024),
            history_limit: app
                .get("history_limit")
                .and_then(Value::as_i64)
                .unwrap_or(200),
            max_concurrent_jobs: usize_or(&app, "max_concurrent_jobs", 2).max(1),
        }
    }
}

fn opt_str(section: &Value, key: &str) -> Option<String> {
    section
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn str_or(section: &Value, key: &str, default: &str) -> String {
    opt_str(section, key).unwrap_or_else(|| default.to_string())
}

fn u64_or(section: &Value, key: &str, default: u64) -> u64 {
    section.get(key).and_then(Value::as_u64).unwrap_or(default)
}

fn usize_or(section: &Value, key: &str, default: usize) -> usize {
    u64_or(section, key, default as u64) as usize
}
