//! Handlers for the `/images` resource.
//!
//! Uploads land in the input namespace; downloads are served from the
//! output namespace, where ComfyUI saves generated images.

use axum::body::Body;
use axum::extract::{Multipart, Query, State};
use axum::http::header;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use vton_core::image_store::{content_type_for_path, Namespace};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Query parameters for `GET /images`.
#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    pub image_uuid: String,
}

/// POST /images
///
/// Accepts a multipart form with a required `file` field. The part's content
/// type decides the stored extension. Returns the new image id.
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<String>)> {
    let mut file_data: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name != "file" {
            continue; // ignore unknown fields
        }
        let content_type = field
            .content_type()
            .map(str::to_string)
            .ok_or_else(|| AppError::BadRequest("The 'file' field has no content type".into()))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        file_data = Some((content_type, data.to_vec()));
    }

    let (content_type, data) =
        file_data.ok_or_else(|| AppError::BadRequest("Missing required 'file' field".into()))?;
    if data.is_empty() {
        return Err(AppError::BadRequest("Uploaded file is empty".into()));
    }

    let id = state
        .store
        .store(&data, &content_type, Namespace::Input)
        .await?;

    tracing::info!(
        image_id = %id,
        content_type = %content_type,
        bytes = data.len(),
        "Image uploaded",
    );

    Ok((StatusCode::CREATED, Json(id.to_string())))
}

/// GET /images?image_uuid=<id>
///
/// Streams the generated image whose name starts with `image_uuid`.
pub async fn get_image(
    State(state): State<AppState>,
    Query(query): Query<ImageQuery>,
) -> AppResult<Response> {
    let path = state
        .store
        .resolve(&query.image_uuid, Namespace::Output)
        .await?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to open {}: {e}", path.display())))?;
    let file_size = file
        .metadata()
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?
        .len();
    let stream = ReaderStream::new(file);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type_for_path(&path).to_string()),
            (header::CONTENT_LENGTH, file_size.to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}
