use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::core::config::validation::MAX_UPLOAD_BYTES_CEILING;
use crate::core::security::API_KEY_HEADER;
use crate::server::handlers::{config, documents, export, health, models, query, sessions};
use crate::state::AppState;

/// Multipart framing on top of the largest upload limit.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

/// Creates the application router: health, config, models, sessions,
/// document upload, querying and transcript export, behind CORS and
/// request tracing.
///
/// The body limit here is only a ceiling; the configured
/// `app.max_upload_bytes` is enforced per request by the upload handler.
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state);
    let body_limit = MAX_UPLOAD_BYTES_CEILING + BODY_LIMIT_SLACK;

    Router::new()
        .route("/health", get(health::health))
        .route("/api/models", get(models::list_models))
        .route(
            "/api/config",
            get(config::get_config)
                .post(config::update_config)
                .patch(config::patch_config),
        )
        .route(
            "/api/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route(
            "/api/sessions/:session_id",
            get(sessions::get_session)
                .patch(sessions::update_session)
                .delete(sessions::delete_session),
        )
        .route(
            "/api/sessions/:session_id/documents",
            get(documents::list_documents).post(documents::upload_documents),
        )
        .route(
            "/api/sessions/:session_id/query",
            post(query::query_session),
        )
        .route(
            "/api/sessions/:session_id/messages",
            get(sessions::get_session_messages),
        )
        .route(
            "/api/sessions/:session_id/export",
            get(export::export_session),
        )
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(state: &Arc<AppState>) -> CorsLayer {
    let config = match state.config.load_config() {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(
                "Failed to load config while building CORS layer: {}; using local defaults",
                err
            );
            Value::Null
        }
    };
    let allowed_origins = resolve_allowed_origins(&config)
        .into_iter()
        .filter_map(|origin| HeaderValue::from_str(&origin).ok())
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ACCEPT,
            header::CONTENT_TYPE,
            header::HeaderName::from_static(API_KEY_HEADER),
        ])
        .expose_headers([header::CONTENT_DISPOSITION])
}

fn resolve_allowed_origins(config: &Value) -> Vec<String> {
    let origins = config
        .get("server")
        .and_then(|server| server.get("cors_allowed_origins"))
        .and_then(|value| value.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|item| item.as_str())
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| item.to_string())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if origins.is_empty() {
        return default_local_origins();
    }

    origins
}

fn default_local_origins() -> Vec<String> {
    ["localhost", "127.0.0.1"]
        .iter()
        .flat_map(|host| {
            ["", ":3000", ":5173", ":8501"]
                .iter()
                .map(move |port| format!("http://{}{}", host, port))
        })
        .collect()
}
