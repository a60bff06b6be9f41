//! SQLite-backed vector store.
//!
//! Node metadata and little-endian f32 embedding blobs live in one table;
//! search is brute-force cosine similarity over the collection.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::chunker::Node;
use super::store::{ScoredNode, VectorStore};
use crate::core::errors::ApiError;
use crate::vector_math::rank_descending_by_cosine;

pub const VECTOR_DB_FILE: &str = "vectors.db";

pub struct SqliteVectorStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteVectorStore {
    /// Opens (creating if needed) `<db_dir>/vectors.db` and binds to `collection`.
    ///
    /// If the collection was built with a different embedding model its
    /// vectors are dropped.
    pub async fn open(
        db_dir: &Path,
        collection: &str,
        embedding_model: &str,
    ) -> Result<Self, ApiError> {
        tokio::fs::create_dir_all(db_dir)
            .await
            .map_err(ApiError::internal)?;
        let db_path = db_dir.join(VECTOR_DB_FILE);

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self {
            pool,
            collection: collection.to_string(),
        };
        store.init_schema().await?;
        store.ensure_embedding_model(embedding_model).await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS nodes (
                collection TEXT NOT NULL,
                node_id TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (collection, node_id)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS store_meta (
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (collection, key)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    async fn ensure_embedding_model(&self, embedding_model: &str) -> Result<(), ApiError> {
        let recorded: Option<String> = sqlx::query_scalar(
            "SELECT value FROM store_meta WHERE collection = ?1 AND key = 'embedding_model'",
        )
        .bind(&self.collection)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        if let Some(previous) = recorded.as_deref() {
            if previous == embedding_model {
                return Ok(());
            }
            let dropped = self.clear().await?;
            tracing::warn!(
                "Embedding model changed ({} -> {}); dropped {} nodes from '{}'",
                previous,
                embedding_model,
                dropped,
                self.collection
            );
        }

        sqlx::query(
            "INSERT OR REPLACE INTO store_meta (collection, key, value, updated_at)
             VALUES (?1, 'embedding_model', ?2, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))",
        )
        .bind(&self.collection)
        .bind(embedding_model)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn row_to_node(row: &sqlx::sqlite::SqliteRow) -> Node {
        let metadata_str: String = row.get("metadata");
        Node {
            node_id: row.get("node_id"),
            doc_id: row.get("doc_id"),
            text: row.get("text"),
            chunk_index: row.get::<i64, _>("chunk_index") as usize,
            start_offset: row.get::<i64, _>("start_offset") as usize,
            end_offset: row.get::<i64, _>("end_offset") as usize,
            metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::Value::Null),
        }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn upsert(&self, items: Vec<(Node, Vec<f32>)>) -> Result<usize, ApiError> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        for (node, embedding) in &items {
            let metadata_str = serde_json::to_string(&node.metadata).map_err(ApiError::internal)?;

            sqlx::query(
                "INSERT OR REPLACE INTO nodes
                    (collection, node_id, doc_id, chunk_index, start_offset, end_offset, text, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(&self.collection)
            .bind(&node.node_id)
            .bind(&node.doc_id)
            .bind(node.chunk_index as i64)
            .bind(node.start_offset as i64)
            .bind(node.end_offset as i64)
            .bind(&node.text)
            .bind(&metadata_str)
            .bind(Self::serialize_embedding(embedding))
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        }

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(items.len())
    }

    async fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<ScoredNode>, ApiError> {
        let rows = sqlx::query(
            "SELECT node_id, doc_id, chunk_index, start_offset, end_offset, text, metadata, embedding
             FROM nodes
             WHERE collection = ?1",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let (candidates, stored): (Vec<_>, Vec<Vec<f32>>) = rows
            .iter()
            .filter_map(|row| {
                let bytes: Vec<u8> = row.get("embedding");
                (!bytes.is_empty()).then(|| (row, Self::deserialize_embedding(&bytes)))
            })
            .unzip();

        let scored: Vec<ScoredNode> = rank_descending_by_cosine(embedding, &stored)
            .into_iter()
            .take(top_k.max(1))
            .map(|(idx, score)| ScoredNode {
                score,
                node: Self::row_to_node(candidates[idx]),
            })
            .collect();

        Ok(scored)
    }

    async fn count(&self) -> Result<usize, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM nodes WHERE collection = ?1")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(count as usize)
    }

    async fn clear(&self) -> Result<usize, ApiError> {
        let result = sqlx::query("DELETE FROM nodes WHERE collection = ?1")
            .bind(&self.collection)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, text: &str) -> Node {
        Node {
            node_id: id.to_string(),
            doc_id: "doc".to_string(),
            text: text.to_string(),
            chunk_index: 0,
            start_offset: 0,
            end_offset: text.len(),
            metadata: json!({ "file_name": "a.txt" }),
        }
    }

    #[tokio::test]
    async fn upsert_and_query_ranks_by_cosine() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteVectorStore::open(tmp.path(), "user_data", "bge").await.unwrap();

        store
            .upsert(vec![
                (node("n1", "about cats"), vec![1.0, 0.0, 0.0]),
                (node("n2", "about dogs"), vec![0.0, 1.0, 0.0]),
                (node("n3", "cats and dogs"), vec![0.7, 0.7, 0.0]),
            ])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 3);

        let results = store.query(&[1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].node.node_id, "n1");
        assert_eq!(results[1].node.node_id, "n3");
        assert!(results[0].score > 0.99);
        assert_eq!(results[0].node.file_name(), "a.txt");
    }

    #[tokio::test]
    async fn upsert_replaces_existing_node() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteVectorStore::open(tmp.path(), "user_data", "bge").await.unwrap();

        store.upsert(vec![(node("n1", "old"), vec![1.0])]).await.unwrap();
        store.upsert(vec![(node("n1", "new"), vec![1.0])]).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let results = store.query(&[1.0], 5).await.unwrap();
        assert_eq!(results[0].node.text, "new");
    }

    #[tokio::test]
    async fn data_persists_across_reopen_and_collections_are_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = SqliteVectorStore::open(tmp.path(), "user_data", "bge").await.unwrap();
            store.upsert(vec![(node("n1", "kept"), vec![1.0])]).await.unwrap();
        }

        let reopened = SqliteVectorStore::open(tmp.path(), "user_data", "bge").await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);

        let other = SqliteVectorStore::open(tmp.path(), "archive", "bge").await.unwrap();
        assert_eq!(other.count().await.unwrap(), 0);
        assert!(tmp.path().join(VECTOR_DB_FILE).exists());
    }

    #[tokio::test]
    async fn changing_embedding_model_drops_vectors() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = SqliteVectorStore::open(tmp.path(), "user_data", "bge-large").await.unwrap();
            store.upsert(vec![(node("n1", "stale"), vec![1.0])]).await.unwrap();
        }

        let store = SqliteVectorStore::open(tmp.path(), "user_data", "bge-small").await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_empties_collection() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteVectorStore::open(tmp.path(), "user_data", "bge").await.unwrap();
        store
            .upsert(vec![(node("a", "x"), vec![1.0]), (node("b", "y"), vec![0.5])])
            .await
            .unwrap();

        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
