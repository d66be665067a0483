//! Drives one generation from input ids to output prefix.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use vton_comfyui::session::ComfyUISession;
use vton_core::error::CoreError;
use vton_core::image_store::{ImageStore, Namespace};
use vton_core::types::JobState;
use vton_core::workflow::{JobTemplate, TemplateSlots};

use crate::error::GenerationError;
use crate::job::{GenerationJob, ImageRole};

/// Coordinates the image store, the job template and the ComfyUI session.
pub struct Orchestrator {
    store: Arc<ImageStore>,
    template: Arc<JobTemplate>,
    slots: TemplateSlots,
    engine: Arc<ComfyUISession>,
    completion_timeout: Duration,
}

impl Orchestrator {
    /// Fails with [`CoreError::SlotNotFound`] if `slots` name a node the
    /// template does not have.
    pub fn new(
        store: Arc<ImageStore>,
        template: Arc<JobTemplate>,
        slots: TemplateSlots,
        engine: Arc<ComfyUISession>,
        completion_timeout: Duration,
    ) -> Result<Self, CoreError> {
        slots.validate_against(&template)?;
        Ok(Self {
            store,
            template,
            slots,
            engine,
            completion_timeout,
        })
    }

    pub fn slots(&self) -> &TemplateSlots {
        &self.slots
    }

    pub fn template(&self) -> &JobTemplate {
        &self.template
    }

    /// Run a generation for two uploaded images and return the output prefix.
    ///
    /// The engine saves its result under that prefix in the output
    /// namespace. A job that times out here may still finish on the engine;
    /// it is not reconciled.
    pub async fn generate(
        &self,
        human_image_id: &str,
        garment_image_id: &str,
    ) -> Result<String, GenerationError> {
        let mut job = GenerationJob::new(human_image_id, garment_image_id);

        let result = self.run(&mut job).await;
        if let Err(e) = &result {
            job.fail(e.to_string());
            tracing::warn!(
                output_prefix = %job.output_prefix,
                prompt_id = job.prompt_id.as_deref().unwrap_or("-"),
                elapsed_ms = job.elapsed_ms(),
                error = %e,
                "Generation failed",
            );
        }
        result
    }

    // ---- private helpers ----

    async fn run(&self, job: &mut GenerationJob) -> Result<String, GenerationError> {
        let human_path = self
            .resolve_input(ImageRole::Human, &job.human_image_id)
            .await?;
        let garment_path = self
            .resolve_input(ImageRole::Garment, &job.garment_image_id)
            .await?;

        let mut document = (*self.template).clone();
        document.bind(&self.slots.human_image, path_value(&human_path))?;
        document.bind(&self.slots.garment_image, path_value(&garment_path))?;
        document.bind(&self.slots.output_prefix, job.output_prefix.to_string())?;
        let payload = serde_json::to_value(&document)
            .map_err(|e| CoreError::Internal(format!("Failed to serialize workflow: {e}")))?;
        job.document = Some(document);

        self.engine.connect().await?;

        job.advance(JobState::Submitting)?;
        let prompt_id = self.engine.submit(&payload).await?;
        job.prompt_id = Some(prompt_id.clone());
        job.advance(JobState::AwaitingEvents)?;

        tracing::info!(
            prompt_id = %prompt_id,
            output_prefix = %job.output_prefix,
            human_image_id = %job.human_image_id,
            garment_image_id = %job.garment_image_id,
            "Generation submitted",
        );

        let completed = self
            .engine
            .await_completion(&prompt_id, self.completion_timeout)
            .await?;
        job.advance(JobState::Complete)?;

        for output in &completed.outputs {
            tracing::debug!(
                prompt_id = %prompt_id,
                node = %output.node,
                bytes = output.data.len(),
                "Output frame received",
            );
        }
        tracing::info!(
            prompt_id = %prompt_id,
            output_prefix = %job.output_prefix,
            elapsed_ms = job.elapsed_ms(),
            "Generation complete",
        );

        Ok(job.output_prefix.to_string())
    }

    async fn resolve_input(&self, role: ImageRole, id: &str) -> Result<PathBuf, GenerationError> {
        self.store
            .resolve(id, Namespace::Input)
            .await
            .map_err(|e| match e {
                // An id the store refuses as malformed cannot name an upload.
                CoreError::NotFound { .. } | CoreError::Validation(_) => {
                    GenerationError::ImageNotFound {
                        role,
                        id: id.to_string(),
                    }
                }
                other => GenerationError::Core(other),
            })
    }
}

fn path_value(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}
