//! Per-prompt progress shared between the event reader and waiters.
//!
//! Every prompt id seen on the channel (or awaited by a caller) gets a
//! [`watch`] channel carrying its [`PromptProgress`]. The single reader task
//! writes into it; any number of waiters subscribe to their own prompt only,
//! so events for other prompts never wake or consume another job's wait.
//!
//! Entries are created on first sight from either side. That covers the
//! race where the engine finishes a prompt before the submitter starts
//! waiting: the terminal state is retained until the waiter arrives, or
//! until the unclaimed-retention window lapses.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use vton_core::types::JobState;

/// Binary payload captured for an allow-listed node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOutput {
    /// Node that was executing when the frame arrived.
    pub node: String,
    /// Event type from the frame header.
    pub event_type: u32,
    /// Frame contents with the header stripped.
    pub data: Vec<u8>,
}

/// What is currently known about one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptProgress {
    pub state: JobState,
    pub outputs: Vec<NodeOutput>,
}

impl Default for PromptProgress {
    fn default() -> Self {
        Self {
            state: JobState::AwaitingEvents,
            outputs: Vec::new(),
        }
    }
}

struct TrackedPrompt {
    progress: watch::Sender<PromptProgress>,
    touched: Instant,
}

impl TrackedPrompt {
    fn new() -> Self {
        let (progress, _) = watch::channel(PromptProgress::default());
        Self {
            progress,
            touched: Instant::now(),
        }
    }
}

/// Registry of prompt progress keyed by prompt id.
pub struct PromptTracker {
    prompts: Mutex<HashMap<String, TrackedPrompt>>,
    /// How long an entry nobody waits on is kept after its last update.
    retention: Duration,
}

impl PromptTracker {
    pub fn new(retention: Duration) -> Self {
        Self {
            prompts: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Subscribe to a prompt's progress, creating the entry if needed.
    ///
    /// The receiver starts with the current value marked as unseen, so a
    /// prompt that already finished is observed immediately.
    pub fn subscribe(&self, prompt_id: &str) -> watch::Receiver<PromptProgress> {
        let mut prompts = self.lock();
        let tracked = prompts
            .entry(prompt_id.to_string())
            .or_insert_with(TrackedPrompt::new);
        let mut rx = tracked.progress.subscribe();
        rx.mark_changed();
        rx
    }

    /// Apply `f` to a prompt's progress, creating the entry if needed.
    ///
    /// Terminal states are sticky: once `Complete` or `Failed`, later
    /// updates are dropped. Returns `true` if the update was applied.
    pub fn update(&self, prompt_id: &str, f: impl FnOnce(&mut PromptProgress)) -> bool {
        let mut prompts = self.lock();
        if !prompts.contains_key(prompt_id) {
            self.prune(&mut prompts);
        }
        let tracked = prompts
            .entry(prompt_id.to_string())
            .or_insert_with(TrackedPrompt::new);
        tracked.touched = Instant::now();

        tracked.progress.send_if_modified(|progress| {
            if progress.state.is_terminal() {
                return false;
            }
            f(progress);
            true
        })
    }

    /// Move a prompt to `state` unless it is already terminal.
    pub fn set_state(&self, prompt_id: &str, state: JobState) -> bool {
        self.update(prompt_id, |progress| progress.state = state)
    }

    /// Drop a prompt's entry. Called when its waiter finishes or gives up.
    pub fn forget(&self, prompt_id: &str) {
        self.lock().remove(prompt_id);
    }

    /// Fail every prompt that has not reached a terminal state.
    ///
    /// Used when the event channel goes away: nothing more will arrive for
    /// those prompts on this connection. Returns how many were failed.
    pub fn fail_in_flight(&self, reason: &str) -> usize {
        let prompts = self.lock();
        prompts
            .values()
            .filter(|tracked| {
                tracked.progress.send_if_modified(|progress| {
                    if progress.state.is_terminal() {
                        return false;
                    }
                    progress.state = JobState::Failed(reason.to_string());
                    true
                })
            })
            .count()
    }

    /// Number of tracked prompts.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Current state of a prompt, if tracked.
    pub fn state(&self, prompt_id: &str) -> Option<JobState> {
        self.lock()
            .get(prompt_id)
            .map(|tracked| tracked.progress.borrow().state.clone())
    }

    // ---- private helpers ----

    /// Remove entries nobody is waiting on that have been idle longer than
    /// the retention window.
    fn prune(&self, prompts: &mut HashMap<String, TrackedPrompt>) {
        let retention = self.retention;
        prompts.retain(|_, tracked| {
            tracked.progress.receiver_count() > 0 || tracked.touched.elapsed() < retention
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TrackedPrompt>> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner())
    }
}
