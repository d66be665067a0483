//! Long-lived session with one ComfyUI server.
//!
//! [`ComfyUISession`] owns a single WebSocket event channel, opened under a
//! session id generated once per process, and the HTTP submission endpoint
//! used with the same id. A background reader task feeds every event into a
//! shared [`PromptTracker`]; callers wait on their own prompt only, so many
//! generations can be in flight at once over the one channel.
//!
//! The channel is opened lazily on first use. When it drops, every prompt
//! still in flight is failed and the next call to [`ComfyUISession::connect`]
//! opens a fresh one.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vton_core::types::JobState;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::client::{ComfyUIClient, ComfyUIClientError};
use crate::processor::{process_messages, EventRouter};
use crate::reconnect::{connect_with_backoff, ReconnectConfig};
use crate::tracker::{NodeOutput, PromptTracker};

/// How long [`ComfyUISession::disconnect`] waits for the reader to exit.
const READER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables for a [`ComfyUISession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Per-attempt WebSocket handshake timeout.
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
    /// Nodes whose binary frames are kept as prompt outputs.
    pub output_nodes: Vec<String>,
    /// Consecutive unparseable events tolerated before the channel is dropped.
    pub max_malformed_events: u32,
    /// How long progress for a prompt nobody waits on is retained.
    pub unclaimed_retention: Duration,
    /// Bound on the `POST /prompt` round trip.
    pub submit_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
            output_nodes: Vec::new(),
            max_malformed_events: 100,
            unclaimed_retention: Duration::from_secs(600),
            submit_timeout: Duration::from_secs(30),
        }
    }
}

/// A prompt that reached completion.
#[derive(Debug, Clone)]
pub struct CompletedPrompt {
    pub prompt_id: String,
    /// Binary outputs captured from allow-listed nodes, in arrival order.
    pub outputs: Vec<NodeOutput>,
}

/// Shared connection to one ComfyUI server.
///
/// Created once at application startup and shared via `Arc`.
pub struct ComfyUISession {
    client_id: String,
    client: ComfyUIClient,
    api: ComfyUIApi,
    tracker: Arc<PromptTracker>,
    config: SessionConfig,
    /// Reader task for the current event channel, if one was opened.
    reader: AsyncMutex<Option<JoinHandle<()>>>,
    /// Cleared by the reader task right before it fails in-flight prompts.
    connected: Arc<AtomicBool>,
    /// Cancelled by [`ComfyUISession::disconnect`]; the session is unusable after.
    cancel: CancellationToken,
    /// Every prompt id handed out under this session.
    issued: Mutex<HashSet<String>>,
}

impl ComfyUISession {
    /// * `api_url` - HTTP base URL, e.g. `http://host:8188`.
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8188`.
    pub fn new(api_url: String, ws_url: String, config: SessionConfig) -> Self {
        Self {
            client_id: uuid::Uuid::new_v4().to_string(),
            client: ComfyUIClient::new(ws_url),
            api: ComfyUIApi::new(api_url),
            tracker: Arc::new(PromptTracker::new(config.unclaimed_retention)),
            config,
            reader: AsyncMutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            issued: Mutex::new(HashSet::new()),
        }
    }

    /// Session id used for both the event channel and submissions.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Whether an event channel is currently open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Open the event channel if it is not already open.
    ///
    /// Idempotent. Concurrent callers share one handshake. Fails with
    /// [`ComfyUISessionError::Closed`] after [`Self::disconnect`].
    pub async fn connect(&self) -> Result<(), ComfyUISessionError> {
        if self.cancel.is_cancelled() {
            return Err(ComfyUISessionError::Closed);
        }

        let mut reader = self.reader.lock().await;
        if self.is_connected() && reader.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        // A reader that lost its channel may still be failing its prompts.
        // Let it finish so it cannot fail prompts submitted on the new one.
        if let Some(stale) = reader.take() {
            if tokio::time::timeout(READER_SHUTDOWN_TIMEOUT, stale)
                .await
                .is_err()
            {
                tracing::warn!(client_id = %self.client_id, "Stale ComfyUI reader did not stop in time");
            }
        }

        let conn = connect_with_backoff(
            &self.client,
            &self.client_id,
            self.config.connect_timeout,
            &self.config.reconnect,
            &self.cancel,
        )
        .await?;

        if self.cancel.is_cancelled() {
            return Err(ComfyUISessionError::Closed);
        }

        let tracker = Arc::clone(&self.tracker);
        let connected = Arc::clone(&self.connected);
        let cancel = self.cancel.clone();
        let max_malformed = self.config.max_malformed_events;
        let mut router = EventRouter::new(
            Arc::clone(&self.tracker),
            self.config.output_nodes.iter().cloned(),
        );
        let client_id = self.client_id.clone();

        connected.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(async move {
            let mut ws_stream = conn.ws_stream;
            let end = process_messages(&mut ws_stream, &mut router, max_malformed, &cancel).await;
            let _ = ws_stream.close(None).await;

            connected.store(false, Ordering::SeqCst);
            let failed = tracker.fail_in_flight(&end.failure_reason());
            tracing::info!(
                client_id = %client_id,
                reason = ?end,
                failed_prompts = failed,
                "ComfyUI event reader stopped",
            );
        });

        *reader = Some(handle);
        Ok(())
    }

    /// Submit a bound workflow under this session's id.
    ///
    /// Opens the event channel first if needed. Returns the engine-assigned
    /// prompt id.
    pub async fn submit(&self, workflow: &serde_json::Value) -> Result<String, ComfyUISessionError> {
        self.connect().await?;

        let timeout = self.config.submit_timeout;
        let response = tokio::time::timeout(
            timeout,
            self.api.submit_workflow(workflow, &self.client_id),
        )
        .await
        .map_err(|_| ComfyUISessionError::SubmitTimeout(timeout))?
        .map_err(|e| match e {
            ComfyUIApiError::ApiError { status, body } => {
                ComfyUISessionError::SubmissionRejected { status, body }
            }
            ComfyUIApiError::Request(e) => ComfyUISessionError::Submit(e.to_string()),
        })?;
        let prompt_id = response.prompt_id;

        if !self.lock_issued().insert(prompt_id.clone()) {
            return Err(ComfyUISessionError::DuplicatePrompt(prompt_id));
        }

        // Register before checking the channel: if the reader dies after
        // this point, fail_in_flight covers the prompt.
        self.tracker.update(&prompt_id, |_| {});
        if !self.is_connected() {
            self.tracker.set_state(
                &prompt_id,
                JobState::Failed("ComfyUI event channel closed".to_string()),
            );
        }

        if response
            .node_errors
            .as_object()
            .is_some_and(|errors| !errors.is_empty())
        {
            tracing::warn!(
                prompt_id = %prompt_id,
                node_errors = %response.node_errors,
                "ComfyUI queued workflow with node errors",
            );
        }

        tracing::info!(
            client_id = %self.client_id,
            prompt_id = %prompt_id,
            queue_number = response.number,
            "Workflow submitted to ComfyUI",
        );

        Ok(prompt_id)
    }

    /// Wait until `prompt_id` completes or fails, for at most `timeout`.
    ///
    /// Only events for this prompt wake the caller. Whatever happens, the
    /// prompt's tracking entry is released when this returns or is dropped.
    pub async fn await_completion(
        &self,
        prompt_id: &str,
        timeout: Duration,
    ) -> Result<CompletedPrompt, ComfyUISessionError> {
        let _release = ReleaseOnDrop {
            tracker: &self.tracker,
            prompt_id,
        };
        let mut rx = self.tracker.subscribe(prompt_id);

        let wait = async {
            loop {
                {
                    let progress = rx.borrow_and_update();
                    match &progress.state {
                        JobState::Complete => return Ok(progress.outputs.clone()),
                        JobState::Failed(reason) => return Err(reason.clone()),
                        _ => {}
                    }
                }
                if rx.changed().await.is_err() {
                    return Err("prompt tracking dropped".to_string());
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(outputs)) => {
                tracing::info!(
                    prompt_id = %prompt_id,
                    outputs = outputs.len(),
                    "Prompt completed",
                );
                Ok(CompletedPrompt {
                    prompt_id: prompt_id.to_string(),
                    outputs,
                })
            }
            Ok(Err(reason)) => Err(ComfyUISessionError::ExecutionFailed {
                prompt_id: prompt_id.to_string(),
                reason,
            }),
            Err(_) => Err(ComfyUISessionError::Timeout {
                prompt_id: prompt_id.to_string(),
                timeout,
            }),
        }
    }

    /// Close the event channel and stop the reader.
    ///
    /// Idempotent. Prompts still in flight are failed. The session cannot be
    /// reconnected afterwards.
    pub async fn disconnect(&self) {
        self.cancel.cancel();

        let handle = self.reader.lock().await.take();
        let Some(handle) = handle else {
            return;
        };

        tracing::info!(client_id = %self.client_id, "Disconnecting from ComfyUI");
        if tokio::time::timeout(READER_SHUTDOWN_TIMEOUT, handle)
            .await
            .is_err()
        {
            tracing::warn!(client_id = %self.client_id, "ComfyUI reader did not stop in time");
        }
    }

    // ---- private helpers ----

    fn lock_issued(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.issued.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ComfyUISession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Releases a prompt's tracking entry when a wait ends.
struct ReleaseOnDrop<'a> {
    tracker: &'a PromptTracker,
    prompt_id: &'a str,
}

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.tracker.forget(self.prompt_id);
    }
}

/// Errors from a [`ComfyUISession`].
#[derive(Debug, thiserror::Error)]
pub enum ComfyUISessionError {
    /// The event channel could not be opened.
    #[error(transparent)]
    Connection(#[from] ComfyUIClientError),

    /// ComfyUI refused to queue the workflow.
    #[error("ComfyUI rejected the workflow ({status}): {body}")]
    SubmissionRejected { status: u16, body: String },

    /// The submission request did not get a usable response.
    #[error("Failed to submit workflow: {0}")]
    Submit(String),

    /// `POST /prompt` did not answer in time. The engine may still queue it.
    #[error("ComfyUI did not accept the workflow within {0:?}")]
    SubmitTimeout(Duration),

    /// ComfyUI handed out a prompt id this session has seen before.
    #[error("ComfyUI returned duplicate prompt id {0}")]
    DuplicatePrompt(String),

    #[error("Prompt {prompt_id} did not finish within {timeout:?}")]
    Timeout { prompt_id: String, timeout: Duration },

    /// The engine reported an error, or the event channel was lost.
    #[error("Prompt {prompt_id} failed: {reason}")]
    ExecutionFailed { prompt_id: String, reason: String },

    /// The session was shut down.
    #[error("ComfyUI session is closed")]
    Closed,
}
