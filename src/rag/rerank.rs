//! Second-stage reranking of retrieved nodes.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::store::ScoredNode;
use crate::core::config::settings::RerankerSettings;
use crate::core::errors::ApiError;

#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// Re-score `nodes` against `query`; best first, at most `top_n`.
    async fn rerank(
        &self,
        query: &str,
        nodes: Vec<ScoredNode>,
        top_n: usize,
    ) -> Result<Vec<ScoredNode>, ApiError>;
}

/// Builds the reranker the settings ask for, or `None` when reranking is off.
pub fn reranker_from_settings(
    settings: &RerankerSettings,
) -> Result<Option<Box<dyn Reranker>>, ApiError> {
    if !settings.enabled {
        return Ok(None);
    }
    match settings.base_url.as_deref().filter(|url| !url.trim().is_empty()) {
        Some(base_url) => Ok(Some(Box::new(CrossEncoderReranker::new(
            base_url,
            &settings.model,
            Duration::from_secs(settings.timeout_secs),
        )?))),
        None => {
            tracing::info!(
                "No reranker endpoint configured; using lexical reranking instead of {}",
                settings.model
            );
            Ok(Some(Box::new(LexicalReranker::default())))
        }
    }
}

/// Cross-encoder served behind a `/v1/rerank` endpoint
/// (text-embeddings-inference, Jina and llama.cpp all accept this shape).
pub struct CrossEncoderReranker {
    base_url: String,
    model: String,
    client: Client,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    #[serde(alias = "score")]
    relevance_score: f32,
}

impl CrossEncoderReranker {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(ApiError::internal)?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
        })
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Maps raw cross-encoder logits back onto `nodes` as sigmoid scores,
/// sorted and truncated.
fn apply_rerank_results(
    nodes: Vec<ScoredNode>,
    results: Vec<RerankResult>,
    top_n: usize,
) -> Vec<ScoredNode> {
    let mut slots: Vec<Option<ScoredNode>> = nodes.into_iter().map(Some).collect();
    let mut reranked: Vec<ScoredNode> = results
        .into_iter()
        .filter_map(|result| {
            let mut scored = slots.get_mut(result.index)?.take()?;
            scored.score = sigmoid(result.relevance_score);
            Some(scored)
        })
        .collect();

    reranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    reranked.truncate(top_n);
    reranked
}

#[async_trait]
impl Reranker for CrossEncoderReranker {
    fn name(&self) -> &str {
        &self.model
    }

    async fn rerank(
        &self,
        query: &str,
        nodes: Vec<ScoredNode>,
        top_n: usize,
    ) -> Result<Vec<ScoredNode>, ApiError> {
        if nodes.is_empty() {
            return Ok(nodes);
        }

        let documents: Vec<&str> = nodes.iter().map(|n| n.node.text.as_str()).collect();
        let body = json!({
            "model": self.model,
            "query": query,
            "documents": documents,
            "texts": documents,
            "top_n": top_n,
            "raw_scores": true,
        });

        let res = self
            .client
            .post(format!("{}/v1/rerank", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(ApiError::upstream)?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "Rerank request failed ({}): {}",
                status, text
            )));
        }

        let payload: RerankResponse = res.json().await.map_err(ApiError::upstream)?;
        Ok(apply_rerank_results(nodes, payload.results, top_n))
    }
}

/// Fallback when no cross-encoder is reachable: blends the vector score with
/// the fraction of query terms found in the node.
pub struct LexicalReranker {
    vector_weight: f32,
}

impl Default for LexicalReranker {
    fn default() -> Self {
        Self { vector_weight: 0.7 }
    }
}

fn query_terms(query: &str) -> HashSet<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

fn term_overlap(terms: &HashSet<String>, text: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let lower = text.to_lowercase();
    let hits = terms.iter().filter(|term| lower.contains(term.as_str())).count();
    hits as f32 / terms.len() as f32
}

#[async_trait]
impl Reranker for LexicalReranker {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn rerank(
        &self,
        query: &str,
        nodes: Vec<ScoredNode>,
        top_n: usize,
    ) -> Result<Vec<ScoredNode>, ApiError> {
        let terms = query_terms(query);
        let mut rescored: Vec<ScoredNode> = nodes
            .into_iter()
            .map(|mut scored| {
                let overlap = term_overlap(&terms, &scored.node.text);
                scored.score =
                    self.vector_weight * scored.score + (1.0 - self.vector_weight) * overlap;
                scored
            })
            .collect();

        rescored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rescored.truncate(top_n);
        Ok(rescored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::chunker::Node;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn scored(id: &str, text: &str, score: f32) -> ScoredNode {
        ScoredNode {
            node: Node {
                node_id: id.to_string(),
                doc_id: "doc".to_string(),
                text: text.to_string(),
                chunk_index: 0,
                start_offset: 0,
                end_offset: text.len(),
                metadata: serde_json::json!({}),
            },
            score,
        }
    }

    #[test]
    fn logits_are_squashed_and_reordered() {
        let nodes = vec![scored("a", "first", 0.9), scored("b", "second", 0.8)];
        let results = vec![
            RerankResult { index: 0, relevance_score: -3.0 },
            RerankResult { index: 1, relevance_score: 4.0 },
        ];

        let out = apply_rerank_results(nodes, results, 5);
        assert_eq!(out[0].node.node_id, "b");
        assert!(out[0].score > 0.98);
        assert!(out[1].score < 0.05);
    }

    #[test]
    fn scores_do_not_depend_on_their_neighbours() {
        let run = |other: f32| {
            let nodes = vec![scored("a", "x", 0.1), scored("b", "y", 0.1)];
            let results = vec![
                RerankResult { index: 0, relevance_score: 0.9 },
                RerankResult { index: 1, relevance_score: other },
            ];
            apply_rerank_results(nodes, results, 5)
        };

        let calm = run(0.2);
        let mixed = run(-2.0);
        assert_eq!(calm[0].node.node_id, "a");
        assert_eq!(calm[0].score, mixed[0].score);
        assert_eq!(calm[0].score, sigmoid(0.9));
    }

    #[test]
    fn results_are_truncated_to_top_n() {
        let nodes = vec![
            scored("a", "x", 0.1),
            scored("b", "y", 0.1),
            scored("c", "z", 0.1),
        ];
        let results = vec![
            RerankResult { index: 2, relevance_score: 0.9 },
            RerankResult { index: 0, relevance_score: 0.5 },
            RerankResult { index: 1, relevance_score: 0.2 },
        ];

        let out = apply_rerank_results(nodes, results, 2);
        let ids: Vec<&str> = out.iter().map(|s| s.node.node_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn out_of_range_and_duplicate_indices_are_ignored() {
        let nodes = vec![scored("a", "x", 0.1)];
        let results = vec![
            RerankResult { index: 0, relevance_score: 0.4 },
            RerankResult { index: 0, relevance_score: 0.6 },
            RerankResult { index: 7, relevance_score: 0.9 },
        ];

        let out = apply_rerank_results(nodes, results, 5);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].score, sigmoid(0.4));
    }

    #[test]
    fn response_accepts_score_alias() {
        let payload: RerankResponse = serde_json::from_value(serde_json::json!({
            "results": [{ "index": 0, "score": 1.5 }]
        }))
        .unwrap();
        assert_eq!(payload.results[0].relevance_score, 1.5);
    }

    #[tokio::test]
    async fn lexical_reranker_promotes_term_matches() {
        let reranker = LexicalReranker::default();
        let nodes = vec![
            scored("generic", "Quarterly numbers were discussed.", 0.80),
            scored("match", "The invoice total cost was 4,200 dollars.", 0.75),
            scored("weak", "Unrelated text.", 0.10),
        ];

        let out = reranker
            .rerank("What was the invoice cost?", nodes, 2)
            .await
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].node.node_id, "match");
        assert_eq!(out[1].node.node_id, "generic");
    }

    #[test]
    fn disabled_settings_yield_no_reranker() {
        let defaults = crate::core::config::RagSettings::default().reranker;
        let settings = RerankerSettings {
            enabled: false,
            ..defaults.clone()
        };
        assert!(reranker_from_settings(&settings).unwrap().is_none());

        let settings = RerankerSettings {
            enabled: true,
            base_url: None,
            ..defaults
        };
        let reranker = reranker_from_settings(&settings).unwrap().unwrap();
        assert_eq!(reranker.name(), "lexical");
    }

    #[tokio::test]
    async fn cross_encoder_posts_documents_and_maps_scores() {
        let captured: Arc<Mutex<Option<Value>>> = Arc::default();
        let sink = captured.clone();
        let app = Router::new().route(
            "/v1/rerank",
            post(move |Json(body): Json<Value>| {
                let sink = sink.clone();
                async move {
                    *sink.lock().unwrap() = Some(body);
                    Json(serde_json::json!({
                        "results": [
                            { "index": 1, "relevance_score": 3.0 },
                            { "index": 0, "relevance_score": -1.0 }
                        ]
                    }))
                }
            }),
        );
        let url = serve(app).await;
        let reranker =
            CrossEncoderReranker::new(&format!("{}/", url), "bge-reranker", Duration::from_secs(5))
                .unwrap();

        let nodes = vec![scored("a", "Pets are allowed.", 0.9), scored("b", "Rent is 900.", 0.5)];
        let out = reranker.rerank("rent", nodes, 1).await.unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].node.node_id, "b");
        assert_eq!(out[0].score, sigmoid(3.0));

        let body = captured.lock().unwrap().clone().unwrap();
        assert_eq!(body["model"], "bge-reranker");
        assert_eq!(body["query"], "rent");
        assert_eq!(body["documents"], serde_json::json!(["Pets are allowed.", "Rent is 900."]));
        assert_eq!(body["texts"], body["documents"]);
        assert_eq!(body["top_n"], 1);
        assert_eq!(body["raw_scores"], true);
    }

    #[tokio::test]
    async fn cross_encoder_error_status_is_upstream() {
        let app = Router::new().route(
            "/v1/rerank",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "model loading") }),
        );
        let url = serve(app).await;
        let reranker = CrossEncoderReranker::new(&url, "bge-reranker", Duration::from_secs(5)).unwrap();

        let err = reranker
            .rerank("rent", vec![scored("a", "Rent is 900.", 0.5)], 3)
            .await
            .unwrap_err();
        match err {
            ApiError::Upstream(message) => assert!(message.contains("model loading")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
