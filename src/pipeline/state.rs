//! Build lifecycle state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    /// Context constructed; no executor created yet.
    Created,
    /// An executor is being created and prepared, possibly repeatedly.
    Preparing,
    /// Main-sequence stages are executing.
    Running,
    /// All user stages succeeded; the success epilogue is executing.
    EpilogueSuccess,
    /// A stage failed; the failure epilogue is executing.
    EpilogueFailure,
    /// Cancellation was observed; the failure epilogue may still run.
    Cancelled,
    /// The build failed before any stage could run.
    Failed,
    /// Terminal state; cleanup and finish have been invoked.
    Finished,
}

impl BuildState {
    /// Returns true when `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition(self, next: Self) -> bool {
        use BuildState::{
            Cancelled, Created, EpilogueFailure, EpilogueSuccess, Failed, Finished, Preparing,
            Running,
        };
        matches!(
            (self, next),
            (Created, Preparing | Failed)
                | (Preparing, Running | Preparing | Failed)
                | (Running, EpilogueSuccess | EpilogueFailure | Cancelled)
                | (
                    EpilogueSuccess | EpilogueFailure | Cancelled | Failed,
                    Finished
                )
        )
    }

    /// Returns true for the terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Finished
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Preparing => write!(f, "preparing"),
            Self::Running => write!(f, "running"),
            Self::EpilogueSuccess => write!(f, "epilogue_success"),
            Self::EpilogueFailure => write!(f, "epilogue_failure"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
            Self::Finished => write!(f, "finished"),
        }
    }
}
