use vton_comfyui::session::ComfyUISessionError;
use vton_core::error::CoreError;

use crate::job::ImageRole;

/// Errors from [`crate::orchestrator::Orchestrator::generate`].
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// One of the input images does not resolve in the input namespace.
    #[error("The {role} image '{id}' was not found")]
    ImageNotFound { role: ImageRole, id: String },

    /// The engine refused the bound workflow.
    #[error("Workflow rejected by ComfyUI: {0}")]
    SubmissionRejected(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// Connection, channel, timeout or execution failure on the engine side.
    #[error(transparent)]
    Engine(ComfyUISessionError),
}

impl From<ComfyUISessionError> for GenerationError {
    fn from(err: ComfyUISessionError) -> Self {
        match err {
            ComfyUISessionError::SubmissionRejected { status, body } => {
                Self::SubmissionRejected(format!("status {status}: {body}"))
            }
            other => Self::Engine(other),
        }
    }
}

impl GenerationError {
    /// Whether the caller's input caused the failure.
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::ImageNotFound { .. } | Self::SubmissionRejected(_) => true,
            Self::Core(e) => matches!(
                e,
                CoreError::NotFound { .. }
                    | CoreError::AmbiguousIdentifier { .. }
                    | CoreError::Validation(_)
            ),
            Self::Engine(_) => false,
        }
    }
}
