use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::history::SessionInfo;
use crate::state::AppState;
use crate::workspace::parse_session_id;

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    pub title: String,
}

/// Validates the path id and loads the session, `NotFound` if it is unknown.
pub(crate) async fn load_session(
    state: &AppState,
    session_id: &str,
) -> Result<SessionInfo, ApiError> {
    let session_id = parse_session_id(session_id)?;
    state.history.require_session(&session_id).await
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;
    let sessions = state.history.list_sessions().await?;
    Ok(Json(json!({"sessions": sessions})))
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Option<Json<CreateSessionRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;
    let Json(payload) = payload.unwrap_or_default();

    let session = state.history.create_session(payload.title).await?;
    if let Err(e) = state.workspaces.open(&session.id).await {
        let _ = state.history.delete_session(&session.id).await;
        return Err(e);
    }

    tracing::info!("Created session {}", session.id);
    Ok(Json(json!({"session": session})))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;
    let session = load_session(&state, &session_id).await?;
    let workspace = state.workspaces.open(&session.id).await?;
    let files = workspace.list_files().await?;

    Ok(Json(json!({"session": session, "files": files})))
}

pub async fn update_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(payload): Json<UpdateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;
    let session = load_session(&state, &session_id).await?;

    let title = payload.title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("Title must not be empty".to_string()));
    }
    state.history.update_session_title(&session.id, title).await?;
    Ok(Json(json!({"success": true})))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;
    let session_id = parse_session_id(&session_id)?;

    if !state.history.delete_session(&session_id).await? {
        return Err(ApiError::NotFound(format!("Session not found: {}", session_id)));
    }
    state.workspaces.remove(&session_id).await?;

    tracing::info!("Deleted session {}", session_id);
    Ok(Json(json!({"success": true})))
}

pub async fn get_session_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;
    let session = load_session(&state, &session_id).await?;

    let limit = params
        .get("limit")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or_else(|| state.settings().history_limit);

    let messages = state.history.get_history(&session.id, limit).await?;
    Ok(Json(json!({"messages": messages})))
}
