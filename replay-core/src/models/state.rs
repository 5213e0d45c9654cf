use super::error::ReplayError;

/// Capture session state machine.
///
/// State transitions:
/// ```text
/// idle → acquiring → running ⇄ paused
///          ↓            ↓        ↓
///        idle        stopped ← ──┘
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Acquiring,
    Running,
    Paused,
    /// Torn down; `reason` is set when the stop was caused by a failure or source loss.
    Stopped { reason: Option<ReplayError> },
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    /// Running or paused: a live capture owns the source.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    /// Whether a new start request must be rejected as already active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Acquiring | Self::Running | Self::Paused)
    }

    /// Whether a new capture may be started from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Acquiring => "acquiring",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped { .. } => "stopped",
        }
    }
}

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A capture is already acquiring or live; the request was a no-op.
    AlreadyActive,
}
