use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::history::MessageRole;
use crate::server::handlers::sessions::load_session;
use crate::state::AppState;

pub const NOT_READY_MESSAGE: &str = "Please upload and process documents first.";

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    /// Model label or model id; the registry default when absent.
    #[serde(default)]
    pub model: Option<String>,
}

pub async fn query_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(payload): Json<QueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;
    let session = load_session(&state, &session_id).await?;

    let query = payload.query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("Query must not be empty".to_string()));
    }
    let models = state.models();
    let model = models.resolve(payload.model.as_deref())?.clone();

    state
        .history
        .add_message(&session.id, MessageRole::User, query, None)
        .await?;

    if !session.db_ready {
        return Err(ApiError::Conflict(NOT_READY_MESSAGE.to_string()));
    }

    let pipeline = state.pipeline();
    let result = {
        let _permit = state.acquire_job().await?;
        let workspace = state.workspaces.open(&session.id).await?;
        pipeline.query(query, &workspace.db_dir, &model.model_id).await
    };
    let answer = match result {
        Ok(answer) => answer,
        // The index is gone, e.g. cleared after an embedding model change.
        Err(ApiError::Conflict(reason)) => {
            tracing::info!("Session {} needs reprocessing: {}", session.id, reason);
            state.history.set_db_ready(&session.id, false).await?;
            return Err(ApiError::Conflict(NOT_READY_MESSAGE.to_string()));
        }
        Err(err) => return Err(err),
    };

    let message_id = state
        .history
        .add_message(
            &session.id,
            MessageRole::Assistant,
            &answer.answer,
            Some(&model.label),
        )
        .await?;

    Ok(Json(json!({
        "answer": answer.answer,
        "model": model,
        "sources": answer.sources,
        "message_id": message_id,
    })))
}
