//! ComfyUI WebSocket message types and parsers.
//!
//! Text frames are JSON with the shape `{"type": "<kind>", "data": {...}}`
//! and are parsed into a strongly-typed [`ComfyUIMessage`]. Binary frames
//! carry an 8-byte header (event type and image format, both big-endian
//! `u32`) followed by the payload; see [`parse_binary_frame`].

use serde::Deserialize;

/// Length of the header that prefixes every binary frame.
pub const BINARY_HEADER_LEN: usize = 8;

/// Binary event type ComfyUI uses for preview/output images.
pub const BINARY_EVENT_IMAGE: u32 = 1;

/// All ComfyUI WebSocket message types the service understands.
#[derive(Debug, Clone)]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth, etc.).
    Status(StatusData),

    /// A prompt has started executing.
    ExecutionStart(ExecutionStartData),

    /// Some nodes were skipped because their outputs are cached.
    ExecutionCached(ExecutionCachedData),

    /// A specific node is currently executing (or execution finished when `node` is `None`).
    Executing(ExecutingData),

    /// Progress update from a long-running node (e.g. KSampler).
    Progress(ProgressData),

    /// A node has finished and produced output.
    Executed(ExecutedData),

    /// Execution failed with an error.
    ExecutionError(ErrorData),

    /// A well-formed message of a type this client does not track.
    Unknown(String),
}

/// Envelope shared by every text frame.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Queue status information.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
    /// Session id, sent once right after the handshake.
    #[serde(default)]
    pub sid: Option<String>,
}

/// Current queue state.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

/// Execution queue statistics.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// Payload for `execution_start` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStartData {
    pub prompt_id: String,
}

/// Payload for `execution_cached` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    /// Node IDs whose outputs were served from cache.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Payload for `executing` messages.
///
/// When `node` is `None`, execution of the prompt has completed.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    pub prompt_id: String,
}

/// Payload for `progress` messages (step-level progress within a node).
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: i32,
    /// Total number of steps.
    pub max: i32,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

impl ProgressData {
    /// Completion percentage (0-100).
    pub fn percent(&self) -> i16 {
        if self.max > 0 {
            ((self.value as f64 / self.max as f64) * 100.0) as i16
        } else {
            0
        }
    }
}

/// Payload for `executed` messages (node output).
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    /// The node that produced this output.
    pub node: String,
    /// Raw output value (images, filenames, etc.).
    pub output: serde_json::Value,
    pub prompt_id: String,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    pub node_id: String,
    pub exception_message: String,
    pub exception_type: String,
}

/// Parse a ComfyUI WebSocket text message into a typed enum.
///
/// Returns `Err` only for frames that are not structured messages at all
/// (invalid JSON, missing `type`, or a known type with a malformed `data`
/// payload). Unrecognised types parse to [`ComfyUIMessage::Unknown`].
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    let Envelope { kind, data } = serde_json::from_str(text)?;

    let msg = match kind.as_str() {
        "status" => ComfyUIMessage::Status(serde_json::from_value(data)?),
        "execution_start" => ComfyUIMessage::ExecutionStart(serde_json::from_value(data)?),
        "execution_cached" => ComfyUIMessage::ExecutionCached(serde_json::from_value(data)?),
        "executing" => ComfyUIMessage::Executing(serde_json::from_value(data)?),
        "progress" => ComfyUIMessage::Progress(serde_json::from_value(data)?),
        "executed" => ComfyUIMessage::Executed(serde_json::from_value(data)?),
        "execution_error" => ComfyUIMessage::ExecutionError(serde_json::from_value(data)?),
        _ => ComfyUIMessage::Unknown(kind),
    };

    Ok(msg)
}

/// A binary frame with its header decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryFrame<'a> {
    pub event_type: u32,
    /// Image format code (1 = JPEG, 2 = PNG for preview images).
    pub format: u32,
    /// Everything after the 8-byte header.
    pub payload: &'a [u8],
}

/// Split a binary frame into its header fields and payload.
///
/// Returns `None` when the frame is shorter than the header.
pub fn parse_binary_frame(data: &[u8]) -> Option<BinaryFrame<'_>> {
    if data.len() < BINARY_HEADER_LEN {
        return None;
    }
    let (header, payload) = data.split_at(BINARY_HEADER_LEN);
    Some(BinaryFrame {
        event_type: u32::from_be_bytes([header[0], header[1], header[2], header[3]]),
        format: u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
        payload,
    })
}
