//! Integration tests for `POST /images` and `GET /images`.

mod common;

use axum::http::{header, StatusCode};
use common::{body_bytes, body_json, get, post_multipart, upload};
use vton_core::image_store::Namespace;

// ---------------------------------------------------------------------------
// Test: upload returns 201 with a fresh id and stores the file by content type
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_stores_file_under_new_id() {
    let t = common::build_test_app().await;

    let id = upload(&t.app, "image/jpeg", b"JPEGDATA").await;

    assert!(uuid::Uuid::parse_str(&id).is_ok());
    let path = t.state.store.resolve(&id, Namespace::Input).await.unwrap();
    assert_eq!(path.extension().unwrap(), "jpg");
    assert_eq!(std::fs::read(path).unwrap(), b"JPEGDATA");
}

// ---------------------------------------------------------------------------
// Test: two uploads get different ids
// ---------------------------------------------------------------------------

#[tokio::test]
async fn uploads_get_distinct_ids() {
    let t = common::build_test_app().await;

    let a = upload(&t.app, "image/png", b"a").await;
    let b = upload(&t.app, "image/png", b"b").await;

    assert_ne!(a, b);
}

// ---------------------------------------------------------------------------
// Test: unsupported content type is rejected with 400
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_rejects_unsupported_content_type() {
    let t = common::build_test_app().await;

    let response = post_multipart(&t.app, "/images", "file", "text/plain", b"hello").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
}

// ---------------------------------------------------------------------------
// Test: a form without a `file` part is rejected with 400
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_requires_file_field() {
    let t = common::build_test_app().await;

    let response = post_multipart(&t.app, "/images", "other", "image/png", b"x").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
}

// ---------------------------------------------------------------------------
// Test: uploads over the body limit are refused
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_over_limit_is_refused() {
    let t = common::build_test_app().await;
    let too_big = vec![0u8; 2 * 1024 * 1024];

    let response = post_multipart(&t.app, "/images", "file", "image/png", &too_big).await;

    assert!(response.status().is_client_error());
    let stored = std::fs::read_dir(t.state.store.dir(Namespace::Input))
        .unwrap()
        .count();
    assert_eq!(stored, 0);
}

// ---------------------------------------------------------------------------
// Test: GET streams an output image with its content type
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_streams_output_image() {
    let t = common::build_test_app().await;
    let output_dir = t.state.store.dir(Namespace::Output);
    std::fs::write(output_dir.join("abc123_00001_.png"), b"PNGBYTES").unwrap();

    let response = get(&t.app, "/images?image_uuid=abc123").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    assert_eq!(body_bytes(response).await, b"PNGBYTES");
}

// ---------------------------------------------------------------------------
// Test: GET for an unknown id returns 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_unknown_image_returns_404() {
    let t = common::build_test_app().await;

    let response = get(&t.app, "/images?image_uuid=doesnotexist").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["code"], "NOT_FOUND");
}

// ---------------------------------------------------------------------------
// Test: uploaded inputs are not served from the output namespace
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_does_not_serve_input_images() {
    let t = common::build_test_app().await;
    let id = upload(&t.app, "image/png", b"input").await;

    let response = get(&t.app, &format!("/images?image_uuid={id}")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: an ambiguous prefix returns 409 instead of an arbitrary file
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_ambiguous_prefix_returns_409() {
    let t = common::build_test_app().await;
    let output_dir = t.state.store.dir(Namespace::Output);
    std::fs::write(output_dir.join("dup_00001_.png"), b"1").unwrap();
    std::fs::write(output_dir.join("dup_00002_.png"), b"2").unwrap();

    let response = get(&t.app, "/images?image_uuid=dup").await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert_eq!(json["code"], "AMBIGUOUS_IDENTIFIER");
}

// ---------------------------------------------------------------------------
// Test: path traversal in the id is rejected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_rejects_path_like_identifier() {
    let t = common::build_test_app().await;

    let response = get(&t.app, "/images?image_uuid=..%2Finput").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
