#![allow(dead_code)]

use std::path::Path;

use axum::body::Body;
use axum::http::{header, Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use vton_api::config::ServerConfig;
use vton_api::router::build_app_router;
use vton_api::state::AppState;
use vton_core::workflow::TemplateSlots;

/// Nothing listens here, so every connect attempt is refused.
pub const UNREACHABLE_ENGINE: &str = "http://127.0.0.1:9";

/// Job template written to disk for each test app.
pub const TEMPLATE: &str = r#"{
    "1": {"inputs": {"image": "human.png", "upload": "image"}, "class_type": "LoadImage"},
    "2": {"inputs": {"image": "garment.png", "upload": "image"}, "class_type": "LoadImage"},
    "4": {
        "inputs": {"human_img": ["1", 0], "garment_img": ["2", 0], "steps": 30},
        "class_type": "IDM-VTON",
        "_meta": {"title": "Run IDM-VTON"}
    },
    "save": {"inputs": {"images": ["4", 0], "filename_prefix": "ComfyUI"}, "class_type": "SaveImage"}
}"#;

/// A router plus the state and temp directory backing it.
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    _dir: tempfile::TempDir,
}

/// Build a test `ServerConfig` rooted at `dir` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default)
/// and a 30-second request timeout.
pub fn test_config(dir: &Path, comfyui_url: &str) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        max_upload_bytes: 1024 * 1024,
        workflow_path: dir.join("workflow.json"),
        input_dir: dir.join("input"),
        output_dir: dir.join("output"),
        comfyui_url: comfyui_url.to_string(),
        comfyui_ws_url: vton_comfyui::client::ws_url_from_http(comfyui_url),
        comfyui_connect_timeout_secs: 1,
        comfyui_submit_timeout_secs: 2,
        generation_timeout_secs: 5,
        slots: TemplateSlots::default(),
        output_nodes: vec!["save".to_string()],
    }
}

/// Build the full application router against an unreachable engine.
pub async fn build_test_app() -> TestApp {
    build_test_app_with_engine(UNREACHABLE_ENGINE).await
}

/// Build the full application router with all middleware layers.
///
/// This goes through `AppState::build` and `build_app_router`, the same
/// path `main.rs` takes.
pub async fn build_test_app_with_engine(comfyui_url: &str) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("workflow.json"), TEMPLATE).unwrap();

    let config = test_config(dir.path(), comfyui_url);
    let state = AppState::build(config.clone()).await.unwrap();
    let app = build_app_router(state.clone(), &config);

    TestApp {
        app,
        state,
        _dir: dir,
    }
}

/// Send a GET request.
pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

/// Send a POST request with a JSON body.
pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

/// Send a multipart POST with a single part named `field`.
pub async fn post_multipart(
    app: &Router,
    uri: &str,
    field: &str,
    content_type: &str,
    data: &[u8],
) -> Response<Body> {
    const BOUNDARY: &str = "vton-test-boundary";

    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"upload\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

/// Upload an image and return its id.
pub async fn upload(app: &Router, content_type: &str, data: &[u8]) -> String {
    let response = post_multipart(app, "/images", "file", content_type, data).await;
    assert_eq!(response.status(), axum::http::StatusCode::CREATED);
    body_json(response).await.as_str().unwrap().to_string()
}

/// Collect a response body into raw bytes.
pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
