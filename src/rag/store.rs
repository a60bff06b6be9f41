//! Storage interface for embedded nodes.
//!
//! The shipped implementation is `SqliteVectorStore`, one database per
//! session index directory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::chunker::Node;
use crate::core::errors::ApiError;

/// A node returned from retrieval or reranking with its score (higher = better).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredNode {
    pub node: Node,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Name of the collection this handle reads and writes.
    fn collection(&self) -> &str;

    /// Insert or replace nodes by `node_id`.
    async fn upsert(&self, items: Vec<(Node, Vec<f32>)>) -> Result<usize, ApiError>;

    /// Top `top_k` nodes by cosine similarity, best first.
    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredNode>, ApiError>;

    async fn count(&self) -> Result<usize, ApiError>;

    /// Remove every node in the collection.
    async fn clear(&self) -> Result<usize, ApiError>;
}
