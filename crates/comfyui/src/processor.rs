//! WebSocket message processing loop.
//!
//! Reads raw frames from a ComfyUI WebSocket connection, parses them into
//! typed [`ComfyUIMessage`] variants and records per-prompt progress in the
//! [`PromptTracker`]. Binary frames are attributed to whichever node was
//! most recently announced as executing, and kept only for allow-listed
//! output nodes.

use std::collections::HashSet;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use vton_core::types::JobState;

use crate::messages::{parse_binary_frame, parse_message, ComfyUIMessage};
use crate::tracker::{NodeOutput, PromptTracker};

/// Why [`process_messages`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The peer closed the connection or the stream ended.
    Closed,
    /// The cancellation token fired.
    Cancelled,
    /// A receive error broke the connection.
    ReceiveError(String),
    /// Too many consecutive frames failed to parse.
    TooManyMalformed(u32),
}

impl StreamEnd {
    /// Reason recorded on prompts still in flight when the stream ended.
    pub fn failure_reason(&self) -> String {
        match self {
            Self::Closed => "ComfyUI event channel closed".to_string(),
            Self::Cancelled => "ComfyUI session disconnected".to_string(),
            Self::ReceiveError(e) => format!("ComfyUI event channel failed: {e}"),
            Self::TooManyMalformed(n) => {
                format!("ComfyUI event channel dropped after {n} malformed events")
            }
        }
    }
}

/// Interprets frames from one connection and feeds the tracker.
///
/// Holds the per-connection "currently executing" pointer, which is what
/// binary frames are attributed to.
pub struct EventRouter {
    tracker: Arc<PromptTracker>,
    output_nodes: HashSet<String>,
    /// `(prompt_id, node)` most recently announced by an `executing` event.
    current: Option<(String, String)>,
    malformed_streak: u32,
}

impl EventRouter {
    pub fn new(tracker: Arc<PromptTracker>, output_nodes: impl IntoIterator<Item = String>) -> Self {
        Self {
            tracker,
            output_nodes: output_nodes.into_iter().collect(),
            current: None,
            malformed_streak: 0,
        }
    }

    /// Consecutive unparseable text frames seen so far.
    pub fn malformed_streak(&self) -> u32 {
        self.malformed_streak
    }

    /// Handle one text frame. Unparseable frames are logged and skipped.
    pub fn handle_text(&mut self, text: &str) {
        let msg = match parse_message(text) {
            Ok(msg) => msg,
            Err(e) => {
                self.malformed_streak += 1;
                tracing::warn!(
                    error = %e,
                    raw_message = %text,
                    streak = self.malformed_streak,
                    "Failed to parse ComfyUI message",
                );
                return;
            }
        };
        self.malformed_streak = 0;

        match msg {
            ComfyUIMessage::Executing(data) => self.handle_executing(data.prompt_id, data.node),
            ComfyUIMessage::ExecutionError(data) => {
                tracing::error!(
                    prompt_id = %data.prompt_id,
                    node_id = %data.node_id,
                    error_type = %data.exception_type,
                    error_message = %data.exception_message,
                    "Execution error",
                );
                if self
                    .current
                    .as_ref()
                    .is_some_and(|(prompt_id, _)| *prompt_id == data.prompt_id)
                {
                    self.current = None;
                }
                self.tracker.set_state(
                    &data.prompt_id,
                    JobState::Failed(format!(
                        "node {} raised {}: {}",
                        data.node_id, data.exception_type, data.exception_message
                    )),
                );
            }
            ComfyUIMessage::ExecutionStart(data) => {
                tracing::info!(prompt_id = %data.prompt_id, "Execution started");
            }
            ComfyUIMessage::ExecutionCached(data) => {
                tracing::debug!(
                    prompt_id = %data.prompt_id,
                    cached_nodes = data.nodes.len(),
                    "Execution used cache",
                );
            }
            ComfyUIMessage::Progress(data) => {
                tracing::debug!(
                    prompt_id = data.prompt_id.as_deref().unwrap_or("-"),
                    node = data.node.as_deref().unwrap_or("-"),
                    value = data.value,
                    max = data.max,
                    percent = data.percent(),
                    "Generation progress",
                );
            }
            ComfyUIMessage::Executed(data) => {
                tracing::debug!(
                    prompt_id = %data.prompt_id,
                    node = %data.node,
                    "Node executed with output",
                );
            }
            ComfyUIMessage::Status(data) => {
                tracing::debug!(
                    queue_remaining = data.status.exec_info.queue_remaining,
                    "ComfyUI queue status",
                );
            }
            ComfyUIMessage::Unknown(kind) => {
                tracing::trace!(kind = %kind, "Ignoring ComfyUI message");
            }
        }
    }

    /// Handle one binary frame.
    ///
    /// Dropped when no node is executing, when the executing node is not an
    /// output node, or when the frame is shorter than its header.
    pub fn handle_binary(&mut self, data: &[u8]) {
        let Some((prompt_id, node)) = &self.current else {
            tracing::trace!(bytes = data.len(), "Binary frame before any executing node, discarded");
            return;
        };
        if !self.output_nodes.contains(node) {
            tracing::trace!(node = %node, bytes = data.len(), "Binary frame from non-output node, discarded");
            return;
        }
        let Some(frame) = parse_binary_frame(data) else {
            tracing::warn!(bytes = data.len(), "Binary frame shorter than its header, discarded");
            return;
        };

        let output = NodeOutput {
            node: node.clone(),
            event_type: frame.event_type,
            data: frame.payload.to_vec(),
        };
        tracing::debug!(
            prompt_id = %prompt_id,
            node = %node,
            bytes = output.data.len(),
            "Captured output frame",
        );
        self.tracker
            .update(prompt_id, |progress| progress.outputs.push(output));
    }

    fn handle_executing(&mut self, prompt_id: String, node: Option<String>) {
        match node {
            Some(node) => {
                tracing::debug!(prompt_id = %prompt_id, node = %node, "Executing node");
                self.tracker
                    .set_state(&prompt_id, JobState::Executing(node.clone()));
                self.current = Some((prompt_id, node));
            }
            None => {
                // node == None means execution is complete for this prompt.
                tracing::info!(prompt_id = %prompt_id, "Execution completed (all nodes done)");
                if self
                    .current
                    .as_ref()
                    .is_some_and(|(current, _)| *current == prompt_id)
                {
                    self.current = None;
                }
                self.tracker.set_state(&prompt_id, JobState::Complete);
            }
        }
    }
}

/// Process WebSocket messages from a ComfyUI connection.
///
/// Loops until the WebSocket closes, encounters a fatal receive error, the
/// stream is exhausted, `cancel` fires, or more than `max_malformed`
/// consecutive text frames fail to parse.
pub async fn process_messages<S>(
    ws_stream: &mut S,
    router: &mut EventRouter,
    max_malformed: u32,
    cancel: &CancellationToken,
) -> StreamEnd
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let msg_result = tokio::select! {
            _ = cancel.cancelled() => return StreamEnd::Cancelled,
            next = ws_stream.next() => match next {
                Some(result) => result,
                None => return StreamEnd::Closed,
            },
        };

        match msg_result {
            Ok(Message::Text(text)) => {
                router.handle_text(&text);
                if router.malformed_streak() > max_malformed {
                    return StreamEnd::TooManyMalformed(router.malformed_streak());
                }
            }
            Ok(Message::Binary(data)) => {
                router.handle_binary(&data);
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Handled automatically by tungstenite.
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "ComfyUI WebSocket closed");
                return StreamEnd::Closed;
            }
            Ok(Message::Frame(_)) => {}
            Err(e) => {
                tracing::error!(error = %e, "WebSocket receive error");
                return StreamEnd::ReceiveError(e.to_string());
            }
        }
    }
}
