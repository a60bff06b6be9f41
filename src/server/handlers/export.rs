use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::IntoResponse;

use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::export::{attachment_file_name, render, ExportFormat};
use crate::server::handlers::sessions::load_session;
use crate::state::AppState;

pub async fn export_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;
    let session = load_session(&state, &session_id).await?;

    let format: ExportFormat = params
        .get("format")
        .map(String::as_str)
        .unwrap_or("md")
        .parse()?;

    let messages = state.history.get_history(&session.id, 0).await?;
    let body = render(format, &session, &messages)?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        attachment_file_name(&session, format)
    );
    let disposition = HeaderValue::from_str(&disposition).map_err(ApiError::internal)?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(format.content_type())),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}
