//! Error types for the buildflow orchestration core.
//!
//! The taxonomy separates failures attributable to the user's job
//! ([`BuildError`]) from transient runner-side failures that the retry
//! policies may repeat, and from configuration errors that fail a stage
//! immediately.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a terminal build failure, reported to the job trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The executed script (or an executor failure attributable to the job)
    /// failed.
    ScriptFailure,
    /// The build exceeded its execution deadline.
    JobExecutionTimeout,
    /// The runner itself failed (infrastructure, signals, missing executors).
    RunnerSystemFailure,
    /// The build was cancelled by the user.
    JobCanceled,
    /// The failure could not be classified.
    UnknownFailure,
}

impl Default for FailureReason {
    fn default() -> Self {
        Self::ScriptFailure
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScriptFailure => write!(f, "script_failure"),
            Self::JobExecutionTimeout => write!(f, "job_execution_timeout"),
            Self::RunnerSystemFailure => write!(f, "runner_system_failure"),
            Self::JobCanceled => write!(f, "job_canceled"),
            Self::UnknownFailure => write!(f, "unknown_failure"),
        }
    }
}

/// A failure that originates from the executed job itself.
///
/// Build errors are never retried by the prepare loop: repeating a broken
/// user script cannot make it pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BuildError {
    /// Human readable description of the failure.
    pub message: String,
    /// Classification reported to the trace.
    pub failure_reason: FailureReason,
}

impl BuildError {
    /// Creates a build error with the default `ScriptFailure` reason.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            failure_reason: FailureReason::ScriptFailure,
        }
    }

    /// Creates a build error with an explicit failure reason.
    #[must_use]
    pub fn with_reason(message: impl Into<String>, failure_reason: FailureReason) -> Self {
        Self {
            message: message.into(),
            failure_reason,
        }
    }
}

/// The error type produced by the orchestration core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunnerError {
    /// Failure attributable to the user's job.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Transient runner-side failure, eligible for retry.
    #[error("{0}")]
    Transient(String),

    /// A `<STAGE>_ATTEMPTS` variable was outside the accepted range.
    #[error("number of attempts out of the range [1, 10] for stage: {stage}")]
    InvalidAttempts {
        /// Canonical name of the affected stage.
        stage: String,
    },

    /// Runner-side failure that is not worth repeating.
    #[error("{0}")]
    System(String),
}

impl RunnerError {
    /// Creates a transient (retryable) error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Creates a non-retryable system error.
    #[must_use]
    pub fn system(message: impl Into<String>) -> Self {
        Self::System(message.into())
    }

    /// Returns true when the retry policies may repeat the failed operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns the classification reported to the trace for this error.
    #[must_use]
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::Build(err) => err.failure_reason,
            Self::Transient(_) | Self::InvalidAttempts { .. } | Self::System(_) => {
                FailureReason::RunnerSystemFailure
            }
        }
    }
}
