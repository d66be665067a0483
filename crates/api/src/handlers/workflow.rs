//! Handler for the `/workflow` resource.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use vton_core::workflow::JobTemplate;

use crate::state::AppState;

#[derive(Serialize)]
pub struct WorkflowResponse {
    pub workflow: JobTemplate,
}

/// GET /workflow
///
/// Returns the job template loaded at startup, unbound.
pub async fn get_workflow(State(state): State<AppState>) -> Json<WorkflowResponse> {
    Json(WorkflowResponse {
        workflow: (*state.template).clone(),
    })
}
