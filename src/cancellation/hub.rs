//! Multiplexes independent cancellation sources into one token.
//!
//! The hub owns the token and a set of watcher tasks, one per source.
//! Whichever source fires first records its cause; later sources are
//! ignored by the token's first-cause-wins rule.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::token::{CancelToken, CancellationCause};
use crate::terminal::InteractiveSession;

/// A process-level interrupt delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT or equivalent.
    Interrupt,
    /// SIGTERM or equivalent.
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "interrupt"),
            Self::Terminate => write!(f, "terminate"),
        }
    }
}

/// Unifies deadline, user cancel and system signals into a single
/// [`CancelToken`].
pub struct CancellationHub {
    token: CancelToken,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl CancellationHub {
    /// Creates a hub with an unfired token and no sources armed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancelToken::new(),
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// Returns the token governed by this hub.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Arms the absolute execution deadline.
    pub fn arm_deadline(&self, timeout: Duration) {
        let token = self.token.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            token.cancel(CancellationCause::deadline(timeout));
        });
        self.watchers.lock().push(handle);
    }

    /// Returns the cancel function handed to the job trace.
    #[must_use]
    pub fn cancel_fn(&self) -> impl Fn() + Send + Sync + 'static {
        let token = self.token.clone();
        move || {
            token.cancel(CancellationCause::user_cancel());
        }
    }

    /// Watches a one-shot system interrupt channel.
    pub fn watch_signal(&self, mut signals: broadcast::Receiver<Signal>) {
        let token = self.token.clone();
        let handle = tokio::spawn(async move {
            if let Ok(signal) = signals.recv().await {
                token.cancel(CancellationCause::system_signal(signal));
            }
        });
        self.watchers.lock().push(handle);
    }

    /// Watches an interactive session's disconnect signal.
    ///
    /// The hub is the sole consumer of the session's one-shot disconnect;
    /// the terminal gate observes the resulting cause through the token
    /// instead of awaiting the session itself.
    pub fn watch_session(&self, session: Arc<dyn InteractiveSession>) {
        let token = self.token.clone();
        let handle = tokio::spawn(async move {
            let reason = session.disconnected().await;
            token.cancel(CancellationCause::terminal_disconnect(reason));
        });
        self.watchers.lock().push(handle);
    }
}

impl Default for CancellationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancellationHub {
    fn drop(&mut self) {
        for handle in self.watchers.lock().drain(..) {
            handle.abort();
        }
    }
}

impl fmt::Debug for CancellationHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationHub")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureReason;

    #[tokio::test]
    async fn test_deadline_fires_with_timeout_cause() {
        let hub = CancellationHub::new();
        hub.arm_deadline(Duration::from_millis(10));

        let cause = hub.token().cancelled().await;
        assert_eq!(cause.reason, FailureReason::JobExecutionTimeout);
        assert!(cause.message.starts_with("execution took longer than"));
    }

    #[tokio::test]
    async fn test_user_cancel_fn() {
        let hub = CancellationHub::new();
        let cancel = hub.cancel_fn();
        cancel();

        let cause = hub.token().cancelled().await;
        assert_eq!(cause.reason, FailureReason::JobCanceled);
        assert_eq!(cause.message, "canceled");
    }

    #[tokio::test]
    async fn test_system_signal() {
        let hub = CancellationHub::new();
        let (tx, rx) = broadcast::channel(1);
        hub.watch_signal(rx);

        tx.send(Signal::Interrupt).unwrap();

        let cause = hub.token().cancelled().await;
        assert_eq!(cause.reason, FailureReason::RunnerSystemFailure);
        assert_eq!(cause.message, "aborted by system signal: interrupt");
    }

    #[tokio::test]
    async fn test_session_disconnect() {
        let hub = CancellationHub::new();
        let session = Arc::new(crate::testing::MockSession::new());
        hub.watch_session(session.clone());

        session.disconnect("peer gone");

        let cause = hub.token().cancelled().await;
        assert_eq!(cause.reason, FailureReason::RunnerSystemFailure);
        assert_eq!(cause.message, "terminal disconnected: peer gone");
    }

    #[tokio::test]
    async fn test_first_source_wins() {
        let hub = CancellationHub::new();
        hub.arm_deadline(Duration::from_secs(3600));

        let cancel = hub.cancel_fn();
        cancel();

        let cause = hub.token().cancelled().await;
        assert_eq!(cause.reason, FailureReason::JobCanceled);
    }
}
