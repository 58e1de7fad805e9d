//! Cancellation token with a classified cause.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::hub::Signal;
use crate::errors::{BuildError, FailureReason, RunnerError};

/// Which cancellation source fired first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelSource {
    /// The absolute execution deadline elapsed.
    Deadline,
    /// The user cancelled the job through the trace.
    UserCancel,
    /// A process signal was delivered to the runner.
    SystemSignal(Signal),
    /// The interactive session's peer disconnected.
    TerminalDisconnect,
}

/// Why a build was cancelled.
///
/// The cause converts into the [`BuildError`] reported as the build's
/// terminal error. Exactly one cause is recorded per token; construction
/// goes through the per-source constructors so source, reason and message
/// always agree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationCause {
    /// The source that fired.
    pub source: CancelSource,
    /// Classification reported to the trace.
    pub reason: FailureReason,
    /// Human readable description.
    pub message: String,
}

impl CancellationCause {
    /// The execution deadline elapsed.
    #[must_use]
    pub fn deadline(timeout: Duration) -> Self {
        Self {
            source: CancelSource::Deadline,
            reason: FailureReason::JobExecutionTimeout,
            message: format!("execution took longer than {timeout:?}"),
        }
    }

    /// The user cancelled the job.
    #[must_use]
    pub fn user_cancel() -> Self {
        Self {
            source: CancelSource::UserCancel,
            reason: FailureReason::JobCanceled,
            message: "canceled".to_string(),
        }
    }

    /// A process signal was delivered.
    #[must_use]
    pub fn system_signal(signal: Signal) -> Self {
        Self {
            source: CancelSource::SystemSignal(signal),
            reason: FailureReason::RunnerSystemFailure,
            message: format!("aborted by system signal: {signal}"),
        }
    }

    /// The interactive session's peer disconnected.
    #[must_use]
    pub fn terminal_disconnect(reason: impl fmt::Display) -> Self {
        Self {
            source: CancelSource::TerminalDisconnect,
            reason: FailureReason::RunnerSystemFailure,
            message: format!("terminal disconnected: {reason}"),
        }
    }

    /// Converts the cause into the terminal error of the build.
    #[must_use]
    pub fn to_error(&self) -> RunnerError {
        RunnerError::Build(BuildError::with_reason(self.message.clone(), self.reason))
    }
}

struct TokenInner {
    cause: RwLock<Option<CancellationCause>>,
    fired: watch::Sender<bool>,
}

/// A cheaply clonable cancellation token.
///
/// Cancellation is idempotent: the first cause wins and later ones are
/// ignored. Every blocking call in the pipeline observes the token, either
/// by polling [`CancelToken::cause`] between suspension points or by racing
/// [`CancelToken::cancelled`].
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    /// Creates a token that has not fired.
    #[must_use]
    pub fn new() -> Self {
        let (fired, _) = watch::channel(false);
        Self {
            inner: Arc::new(TokenInner {
                cause: RwLock::new(None),
                fired,
            }),
        }
    }

    /// Fires the token with `cause`. The first cause wins.
    pub fn cancel(&self, cause: CancellationCause) {
        {
            let mut slot = self.inner.cause.write();
            if slot.is_some() {
                return;
            }
            *slot = Some(cause);
        }
        let _ = self.inner.fired.send(true);
    }

    /// Returns true once the token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.inner.fired.borrow()
    }

    /// Returns the recorded cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<CancellationCause> {
        self.inner.cause.read().clone()
    }

    /// Resolves once the token fires, yielding the recorded cause.
    pub async fn cancelled(&self) -> CancellationCause {
        let mut rx = self.inner.fired.subscribe();
        loop {
            if *rx.borrow_and_update() {
                if let Some(cause) = self.cause() {
                    return cause;
                }
            }
            if rx.changed().await.is_err() {
                // The sender lives as long as this token; pend rather than
                // fabricate a cause.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("cause", &self.cause())
            .finish()
    }
}
