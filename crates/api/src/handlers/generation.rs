//! Handler for `POST /generate`.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use vton_core::workflow::SlotRef;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Request body: a workflow document whose image slots hold uploaded ids.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub workflow: Value,
}

/// POST /generate
///
/// Reads the human and garment ids from the configured slots of the
/// submitted document, runs the generation against a fresh copy of the
/// server's template and returns the output prefix.
pub async fn generate(
    State(state): State<AppState>,
    Json(body): Json<GenerateRequest>,
) -> AppResult<Json<String>> {
    let slots = state.orchestrator.slots();
    let human_image_id = slot_identifier(&body.workflow, &slots.human_image)?;
    let garment_image_id = slot_identifier(&body.workflow, &slots.garment_image)?;

    let output_prefix = state
        .orchestrator
        .generate(&human_image_id, &garment_image_id)
        .await?;

    Ok(Json(output_prefix))
}

/// Read an image id from `slot` of a client document.
///
/// Accepts a bare id or a stored file name; the extension is dropped.
fn slot_identifier(document: &Value, slot: &SlotRef) -> AppResult<String> {
    let value = document
        .get(&slot.node_id)
        .and_then(|node| node.get("inputs"))
        .and_then(|inputs| inputs.get(&slot.input_key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            AppError::BadRequest(format!("Workflow slot {slot} must hold an image id"))
        })?;

    let stem = value.split_once('.').map_or(value, |(stem, _)| stem);
    Ok(stem.to_string())
}
