use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

const LLM_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// Liveness plus a bounded check that the chat backend answers.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pipeline = state.pipeline();
    let check = tokio::time::timeout(LLM_CHECK_TIMEOUT, pipeline.llm().health_check());
    let llm_reachable = match check.await {
        Ok(Ok(reachable)) => reachable,
        Ok(Err(err)) => {
            tracing::debug!("LLM health check failed: {}", err);
            false
        }
        Err(_) => false,
    };

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "llm_provider": pipeline.llm().name(),
        "llm_reachable": llm_reachable,
        "embedding_model": pipeline.settings().embedding.model,
    }))
}
