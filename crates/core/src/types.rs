use std::fmt;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Lifecycle of one submitted generation job.
///
/// ```text
/// Idle -> Submitting -> AwaitingEvents -> Executing(node) <-> Executing(node')
///                                      \-> Complete
/// any non-terminal state -> Failed
/// ```
///
/// `AwaitingEvents -> Complete` is legal: a fully cached prompt finishes
/// without announcing any node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum JobState {
    #[default]
    Idle,
    Submitting,
    AwaitingEvents,
    /// The engine announced this node as currently executing.
    Executing(String),
    Complete,
    /// Terminal failure with a human-readable reason.
    Failed(String),
}

impl JobState {
    /// `true` for `Complete` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed(_))
    }

    /// Short lowercase label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::AwaitingEvents => "awaiting_events",
            Self::Executing(_) => "executing",
            Self::Complete => "complete",
            Self::Failed(_) => "failed",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Complete | Failed(_), _) => false,
            (_, Failed(_)) => true,
            (Idle, Submitting) => true,
            (Submitting, AwaitingEvents) => true,
            (AwaitingEvents | Executing(_), Executing(_) | Complete) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Executing(node) => write!(f, "executing({node})"),
            Self::Failed(reason) => write!(f, "failed({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}
