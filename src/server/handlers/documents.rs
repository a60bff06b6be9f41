use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::rag::IngestStatus;
use crate::server::handlers::sessions::load_session;
use crate::state::AppState;

pub const NO_FILES_MESSAGE: &str = "Please upload files first.";

struct Upload {
    name: String,
    bytes: Vec<u8>,
}

fn too_large(max_bytes: usize) -> ApiError {
    ApiError::BadRequest(format!("Upload exceeds the {} byte limit", max_bytes))
}

/// Reads every file field, failing as soon as the running total passes `max_bytes`.
async fn read_uploads(mut multipart: Multipart, max_bytes: usize) -> Result<Vec<Upload>, ApiError> {
    let mut uploads = Vec::new();
    let mut total = 0usize;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid upload: {}", e)))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read {}: {}", name, e)))?
        {
            total += chunk.len();
            if total > max_bytes {
                return Err(too_large(max_bytes));
            }
            bytes.extend_from_slice(&chunk);
        }

        if name.trim().is_empty() {
            continue;
        }
        uploads.push(Upload { name, bytes });
    }

    Ok(uploads)
}

/// Replaces the session's uploaded files with this batch and indexes them.
pub async fn upload_documents(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;
    let session = load_session(&state, &session_id).await?;

    let pipeline = state.pipeline();
    let uploads = read_uploads(multipart, pipeline.settings().max_upload_bytes).await?;
    if uploads.is_empty() {
        return Err(ApiError::BadRequest(NO_FILES_MESSAGE.to_string()));
    }

    let _permit = state.acquire_job().await?;
    let workspace = state.workspaces.open(&session.id).await?;
    workspace.reset_files().await?;

    let mut saved = Vec::with_capacity(uploads.len());
    for upload in &uploads {
        let path = workspace.save_file(&upload.name, &upload.bytes).await?;
        if let Some(name) = path.file_name() {
            saved.push(name.to_string_lossy().to_string());
        }
    }
    tracing::info!("Saved {} files for session {}", saved.len(), session.id);

    let report = pipeline
        .process_documents(&workspace.files_dir, &workspace.db_dir)
        .await?;
    if report.status == IngestStatus::Success {
        state.history.set_db_ready(&session.id, true).await?;
    }

    Ok(Json(json!({
        "status": report.status,
        "message": report.message,
        "documents": report.documents,
        "nodes": report.nodes,
        "files": saved,
        "db_ready": report.status == IngestStatus::Success || session.db_ready,
    })))
}

pub async fn list_documents(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;
    let session = load_session(&state, &session_id).await?;
    let workspace = state.workspaces.open(&session.id).await?;
    let files = workspace.list_files().await?;

    Ok(Json(json!({"files": files, "db_ready": session.db_ready})))
}
