pub mod health;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::config::ServerConfig;
use crate::handlers;
use crate::state::AppState;

/// Build the public route tree.
///
/// Route hierarchy:
///
/// ```text
/// GET  /workflow                      current job template
/// POST /images                        upload an input image (multipart)
/// GET  /images?image_uuid=<id>        stream a generated image
/// POST /generate                      run a try-on generation
/// ```
pub fn api_routes(config: &ServerConfig) -> Router<AppState> {
    Router::new()
        .route("/workflow", get(handlers::workflow::get_workflow))
        .route(
            "/images",
            post(handlers::images::upload_image)
                .get(handlers::images::get_image)
                .layer(DefaultBodyLimit::max(config.max_upload_bytes)),
        )
        .route("/generate", post(handlers::generation::generate))
}
