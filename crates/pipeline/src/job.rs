//! Per-request generation job.

use std::fmt;

use vton_core::error::CoreError;
use vton_core::types::{JobState, Timestamp};
use vton_core::workflow::JobTemplate;

/// Which of the two input images an identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    Human,
    Garment,
}

impl ImageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Garment => "garment",
        }
    }
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generation request, owned by the orchestrator while it runs.
///
/// Never persisted; dropped when the request completes or fails.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub human_image_id: String,
    pub garment_image_id: String,
    /// The template clone with this job's slots bound.
    pub document: Option<JobTemplate>,
    /// Assigned by the engine on submission.
    pub prompt_id: Option<String>,
    /// Minted here; the engine names the saved output after it.
    pub output_prefix: uuid::Uuid,
    pub state: JobState,
    pub created_at: Timestamp,
}

impl GenerationJob {
    pub fn new(human_image_id: impl Into<String>, garment_image_id: impl Into<String>) -> Self {
        Self {
            human_image_id: human_image_id.into(),
            garment_image_id: garment_image_id.into(),
            document: None,
            prompt_id: None,
            output_prefix: uuid::Uuid::new_v4(),
            state: JobState::Idle,
            created_at: chrono::Utc::now(),
        }
    }

    /// Move to `next`, rejecting transitions the job state machine forbids.
    pub fn advance(&mut self, next: JobState) -> Result<(), CoreError> {
        if !self.state.can_transition_to(&next) {
            return Err(CoreError::Internal(format!(
                "Invalid job transition {} -> {}",
                self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Record a failure unless the job already finished.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.state.is_terminal() {
            self.state = JobState::Failed(reason.into());
        }
    }

    /// Time since the job was created, in milliseconds.
    pub fn elapsed_ms(&self) -> i64 {
        (chrono::Utc::now() - self.created_at).num_milliseconds()
    }
}
