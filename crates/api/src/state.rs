use std::sync::Arc;

use vton_comfyui::session::ComfyUISession;
use vton_core::error::CoreError;
use vton_core::image_store::ImageStore;
use vton_core::workflow::JobTemplate;
use vton_pipeline::orchestrator::Orchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Input and output image directories.
    pub store: Arc<ImageStore>,
    /// Job template loaded at startup; never mutated.
    pub template: Arc<JobTemplate>,
    /// The single ComfyUI session for this process.
    pub engine: Arc<ComfyUISession>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Load the job template, prepare the image directories and wire the
    /// orchestrator to a new ComfyUI session.
    ///
    /// Does not contact ComfyUI; the event channel opens on first use.
    pub async fn build(config: ServerConfig) -> Result<Self, CoreError> {
        let template = Arc::new(JobTemplate::load(&config.workflow_path)?);
        tracing::info!(
            path = %config.workflow_path.display(),
            nodes = template.len(),
            "Job template loaded",
        );

        let store = Arc::new(ImageStore::new(
            config.input_dir.clone(),
            config.output_dir.clone(),
        ));
        store.ensure_dirs().await?;

        let engine = Arc::new(ComfyUISession::new(
            config.comfyui_url.clone(),
            config.comfyui_ws_url.clone(),
            config.session_config(),
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            Arc::clone(&template),
            config.slots.clone(),
            Arc::clone(&engine),
            config.generation_timeout(),
        )?);

        Ok(Self {
            config: Arc::new(config),
            store,
            template,
            engine,
            orchestrator,
        })
    }
}
