use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use vton_comfyui::session::ComfyUISessionError;
use vton_core::error::CoreError;
use vton_pipeline::error::GenerationError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] and [`GenerationError`] for domain errors and adds
/// HTTP-specific variants. Implements [`IntoResponse`] to produce consistent
/// JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `vton_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A failed generation from `vton_pipeline`.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),

            AppError::Generation(err) => match err {
                GenerationError::ImageNotFound { role, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("The {role} image '{id}' was not found"),
                ),
                GenerationError::SubmissionRejected(msg) => (
                    StatusCode::BAD_REQUEST,
                    "SUBMISSION_REJECTED",
                    format!("Workflow rejected by ComfyUI: {msg}"),
                ),
                GenerationError::Core(core) => classify_core_error(core),
                GenerationError::Engine(engine) => classify_engine_error(engine),
            },

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal_error()
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Classify a core error into an HTTP status, error code, and message.
///
/// A missing slot means the loaded template does not fit the configured
/// slots, which is a server fault rather than bad input.
fn classify_core_error(err: &CoreError) -> (StatusCode, &'static str, String) {
    match err {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::AmbiguousIdentifier { prefix, matches } => (
            StatusCode::CONFLICT,
            "AMBIGUOUS_IDENTIFIER",
            format!("Identifier '{prefix}' matches {matches} images"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::SlotNotFound { .. } | CoreError::Storage(_) | CoreError::Internal(_) => {
            tracing::error!(error = %err, "Internal core error");
            internal_error()
        }
    }
}

/// Classify an engine failure. Details are logged, never returned.
fn classify_engine_error(err: &ComfyUISessionError) -> (StatusCode, &'static str, String) {
    match err {
        ComfyUISessionError::Timeout { prompt_id, timeout } => {
            tracing::error!(prompt_id = %prompt_id, ?timeout, "Generation timed out");
            (
                StatusCode::GATEWAY_TIMEOUT,
                "ENGINE_TIMEOUT",
                "Generation did not finish in time".to_string(),
            )
        }
        ComfyUISessionError::SubmitTimeout(timeout) => {
            tracing::error!(?timeout, "Workflow submission timed out");
            (
                StatusCode::GATEWAY_TIMEOUT,
                "ENGINE_TIMEOUT",
                "The generation engine did not accept the workflow in time".to_string(),
            )
        }
        other => {
            tracing::error!(error = %other, "Generation engine error");
            (
                StatusCode::BAD_GATEWAY,
                "ENGINE_ERROR",
                "The generation engine failed to process the request".to_string(),
            )
        }
    }
}

fn internal_error() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
