//! Retrieval-augmented generation over uploaded documents.
//!
//! - `chunker`: semantic and fixed-size node parsers
//! - `embedding`: `Embedder` trait and the OpenAI-compatible HTTP client
//! - `store` / `sqlite`: vector store trait and its SQLite implementation
//! - `rerank`: cross-encoder and lexical rerankers
//! - `synthesizer`: compact answer synthesis and output cleanup
//! - `pipeline`: `RagPipeline`, which ties the above together

pub mod chunker;
pub mod embedding;
pub mod pipeline;
pub mod rerank;
pub mod sqlite;
pub mod store;
pub mod synthesizer;

pub use chunker::{Node, NodeParser};
pub use embedding::{Embedder, HttpEmbedder};
pub use pipeline::{IngestReport, IngestStatus, QueryAnswer, RagPipeline, SourceRef};
pub use rerank::{CrossEncoderReranker, LexicalReranker, Reranker};
pub use sqlite::SqliteVectorStore;
pub use store::{ScoredNode, VectorStore};
pub use synthesizer::{clean_output, CompactSynthesizer};
