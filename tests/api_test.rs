mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use docqa_backend::core::config::{AppPaths, RagSettings};
use docqa_backend::core::security::SessionToken;
use docqa_backend::server::router::router;
use docqa_backend::state::AppState;

const TOKEN: &str = "test-token";
const BOUNDARY: &str = "docqa-test-boundary";

struct TestApp {
    app: Router,
    state: Arc<AppState>,
    _tmp: tempfile::TempDir,
}

async fn test_app() -> TestApp {
    let tmp = tempfile::tempdir().unwrap();
    let paths = Arc::new(AppPaths::with_data_dir(tmp.path()));
    let (pipeline, _) = common::test_pipeline();
    let state = AppState::with_pipeline(paths, SessionToken::new(TOKEN), pipeline)
        .await
        .unwrap();
    TestApp {
        app: router(state.clone()),
        state,
        _tmp: tmp,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, request).await;
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header("x-api-key", TOKEN)
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", TOKEN)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart(uri: &str, files: &[(&str, &str)]) -> Request<Body> {
    let mut body = String::new();
    for (name, content) in files {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n{content}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));

    Request::post(uri)
        .header("x-api-key", TOKEN)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn create_session(app: &Router) -> String {
    let (status, body) = send_json(app, json_request("POST", "/api/sessions", json!({"title": "Lease"}))).await;
    assert_eq!(status, StatusCode::OK);
    body["session"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_is_public_but_api_needs_key() {
    let t = test_app().await;

    let (status, body) = send_json(&t.app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["llm_reachable"], true);

    let (status, body) = send_json(&t.app, Request::get("/api/models").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let (status, body) = send_json(&t.app, get("/api/models")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["models"].as_array().unwrap().len(), 5);
    assert_eq!(body["default"]["model_id"], "llama-3.3-70b-versatile");
}

#[tokio::test]
async fn full_session_flow() {
    let t = test_app().await;
    let id = create_session(&t.app).await;
    assert!(t.state.paths.sessions_dir.join(&id).join("files").is_dir());

    // querying before processing records the question but refuses to answer
    let (status, body) = send_json(
        &t.app,
        json_request("POST", &format!("/api/sessions/{id}/query"), json!({"query": "What is the rent?"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Please upload and process documents first.");

    let (status, body) = send_json(
        &t.app,
        multipart(
            &format!("/api/sessions/{id}/documents"),
            &[("../lease.txt", "The monthly rent is 1,200 dollars. Rent is due on the first.")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Success");
    assert_eq!(body["files"], json!(["lease.txt"]));
    assert_eq!(body["db_ready"], true);

    let (status, body) = send_json(
        &t.app,
        json_request(
            "POST",
            &format!("/api/sessions/{id}/query"),
            json!({"query": "What is the rent?", "model": "Qwen 3 32B"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answer"], "The monthly rent is 1,200 dollars");
    assert_eq!(body["model"]["model_id"], "qwen/qwen3-32b");
    assert_eq!(body["sources"][0]["file_name"], "lease.txt");

    let (status, body) = send_json(&t.app, get(&format!("/api/sessions/{id}/messages"))).await;
    assert_eq!(status, StatusCode::OK);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2]["role"], "assistant");
    assert_eq!(messages[2]["model_name"], "Qwen 3 32B");

    let (status, bytes) = send(&t.app, get(&format!("/api/sessions/{id}/export?format=md"))).await;
    assert_eq!(status, StatusCode::OK);
    let transcript = String::from_utf8(bytes).unwrap();
    assert!(transcript.starts_with("# Lease"));
    assert!(transcript.contains("**User:** What is the rent?"));
    assert!(transcript.contains("**AI (Qwen 3 32B):** The monthly rent is 1,200 dollars\n\n---"));

    let (status, body) = send_json(&t.app, get(&format!("/api/sessions/{id}/documents"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["files"][0]["name"], "lease.txt");

    let request = Request::delete(format!("/api/sessions/{id}"))
        .header("x-api-key", TOKEN)
        .body(Body::empty())
        .unwrap();
    let (status, _) = send_json(&t.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!t.state.paths.sessions_dir.join(&id).exists());

    let (status, _) = send_json(&t.app, get(&format!("/api/sessions/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_without_files_is_rejected() {
    let t = test_app().await;
    let id = create_session(&t.app).await;

    let (status, body) = send_json(&t.app, multipart(&format!("/api/sessions/{id}/documents"), &[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Please upload files first.");
}

#[tokio::test]
async fn unsupported_upload_reports_no_documents() {
    let t = test_app().await;
    let id = create_session(&t.app).await;

    let (status, body) = send_json(
        &t.app,
        multipart(&format!("/api/sessions/{id}/documents"), &[("photo.jpg", "not text")]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_documents");
    assert_eq!(body["message"], "No documents found.");
    assert_eq!(body["db_ready"], false);
}

#[tokio::test]
async fn invalid_inputs_map_to_client_errors() {
    let t = test_app().await;

    let (status, _) = send_json(&t.app, get("/api/sessions/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(
        &t.app,
        get("/api/sessions/6f1c2d4e-8a9b-4c3d-9e2f-1a2b3c4d5e6f/messages"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let id = create_session(&t.app).await;
    let (status, body) = send_json(
        &t.app,
        json_request(
            "POST",
            &format!("/api/sessions/{id}/query"),
            json!({"query": "rent?", "model": "gpt-99"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Unknown model: gpt-99");

    let (status, _) = send_json(&t.app, get(&format!("/api/sessions/{id}/export?format=pdf"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn session_listing_and_rename() {
    let t = test_app().await;
    let id = create_session(&t.app).await;

    let (status, _) = send_json(
        &t.app,
        json_request("PATCH", &format!("/api/sessions/{id}"), json!({"title": "Renamed"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(&t.app, get("/api/sessions")).await;
    assert_eq!(status, StatusCode::OK);
    let sessions = body["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["title"], "Renamed");
    assert_eq!(sessions[0]["db_ready"], false);
}

#[tokio::test]
async fn config_round_trip_redacts_secrets() {
    let t = test_app().await;

    let (status, _) = send_json(
        &t.app,
        json_request(
            "PATCH",
            "/api/config",
            json!({"llm": {"api_key": "gsk-secret"}, "rag": {"similarity_top_k": 7}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(&t.app, get("/api/config")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["llm"]["api_key"], "****");
    assert_eq!(body["rag"]["similarity_top_k"], 7);
    assert_eq!(t.state.settings().similarity_top_k, 7);

    let (status, _) = send_json(
        &t.app,
        json_request("PATCH", "/api/config", json!({"rag": {"similarity_top_k": 0}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn embedding_model_change_marks_session_for_reprocessing() {
    let t = test_app().await;
    let id = create_session(&t.app).await;

    let (status, body) = send_json(
        &t.app,
        multipart(&format!("/api/sessions/{id}/documents"), &[("lease.txt", "Rent is 900 dollars.")]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["db_ready"], true);

    let (pipeline, _) = common::test_pipeline_with(
        Arc::new(common::VersionedEmbedder("topic-v2")),
        RagSettings::default(),
    );
    t.state.replace_pipeline(pipeline);

    let (status, body) = send_json(
        &t.app,
        json_request("POST", &format!("/api/sessions/{id}/query"), json!({"query": "What is the rent?"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Please upload and process documents first.");

    let (_, body) = send_json(&t.app, get(&format!("/api/sessions/{id}"))).await;
    assert_eq!(body["session"]["db_ready"], false);
}

#[tokio::test]
async fn upload_limit_follows_the_live_settings() {
    let t = test_app().await;
    let id = create_session(&t.app).await;
    let content = "Rent is 900 dollars. ".repeat(100);

    let mut small = RagSettings::default();
    small.max_upload_bytes = 512;
    let (pipeline, _) = common::test_pipeline_with(Arc::new(common::TopicEmbedder), small);
    t.state.replace_pipeline(pipeline);

    let (status, body) = send_json(
        &t.app,
        multipart(&format!("/api/sessions/{id}/documents"), &[("lease.txt", content.as_str())]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Upload exceeds the 512 byte limit");

    let mut larger = RagSettings::default();
    larger.max_upload_bytes = 64 * 1024;
    let (pipeline, _) = common::test_pipeline_with(Arc::new(common::TopicEmbedder), larger);
    t.state.replace_pipeline(pipeline);

    let (status, body) = send_json(
        &t.app,
        multipart(&format!("/api/sessions/{id}/documents"), &[("lease.txt", content.as_str())]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
}
