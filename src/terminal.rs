//! Interactive terminal session gate.
//!
//! When a session is attached, the build stays alive after its script until
//! the job is cancelled, the session times out, the process is interrupted
//! or the peer disconnects. Whichever happens first closes the session.
//!
//! The session's one-shot disconnect signal is owned by the cancellation
//! hub ([`CancellationHub::watch_session`]); the gate observes the
//! resulting cause through the token rather than awaiting the session a
//! second time, so there is never more than one consumer of the signal.
//!
//! [`CancellationHub::watch_session`]: crate::cancellation::CancellationHub::watch_session

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::cancellation::{CancelSource, CancelToken, CancellationCause, Signal};
use crate::errors::RunnerError;

/// An interactive shell attached to the running job.
///
/// Implementations own the transport; the core only needs the disconnect
/// signal and a way to close the session. `disconnected` is a one-shot
/// signal with a single consumer; `close` must be idempotent.
#[async_trait]
pub trait InteractiveSession: Send + Sync {
    /// Resolves when the peer disconnects, yielding a description of the
    /// disconnect.
    async fn disconnected(&self) -> String;

    /// Closes the session.
    fn close(&self);
}

/// Blocks until exactly one terminal-ending event occurs.
///
/// The session is closed exactly once before returning. The returned error
/// describes which event ended the session: job cancellation, the gate
/// timeout, a process signal, or a peer disconnect surfaced through the
/// token's cause.
pub async fn wait_for_terminal(
    token: &CancelToken,
    timeout: Duration,
    mut signals: broadcast::Receiver<Signal>,
    session: &Arc<dyn InteractiveSession>,
) -> Result<(), RunnerError> {
    let signal_fired = async {
        loop {
            match signals.recv().await {
                Ok(signal) => return signal,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    std::future::pending::<()>().await;
                }
            }
        }
    };

    let result = tokio::select! {
        cause = token.cancelled() => Err(cancel_cause_error(&cause)),
        () = tokio::time::sleep(timeout) => {
            Err(RunnerError::system(format!(
                "terminal session timed out (maximum time allowed - {timeout:?})"
            )))
        }
        signal = signal_fired => {
            Err(RunnerError::system(format!(
                "terminal disconnected by system signal: {signal}"
            )))
        }
    };

    session.close();
    result
}

/// Maps a token cause onto the gate's error contract.
///
/// Disconnects and signals keep their specific texts regardless of whether
/// they reach the gate through the token or (for signals) through the
/// broadcast channel.
fn cancel_cause_error(cause: &CancellationCause) -> RunnerError {
    match cause.source {
        CancelSource::TerminalDisconnect => RunnerError::system(cause.message.clone()),
        CancelSource::SystemSignal(signal) => RunnerError::system(format!(
            "terminal disconnected by system signal: {signal}"
        )),
        CancelSource::Deadline | CancelSource::UserCancel => {
            RunnerError::system("build cancelled, killing session")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationHub;
    use crate::testing::MockSession;

    fn session() -> (Arc<MockSession>, Arc<dyn InteractiveSession>) {
        let mock = Arc::new(MockSession::new());
        let trait_obj: Arc<dyn InteractiveSession> = mock.clone();
        (mock, trait_obj)
    }

    #[tokio::test]
    async fn test_build_cancel_kills_session() {
        let token = CancelToken::new();
        let (_tx, rx) = broadcast::channel(1);
        let (mock, trait_obj) = session();

        token.cancel(CancellationCause::user_cancel());
        let err = wait_for_terminal(&token, Duration::from_secs(3600), rx, &trait_obj)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "build cancelled, killing session");
        assert_eq!(mock.close_count(), 1);
    }

    #[tokio::test]
    async fn test_terminal_timeout() {
        let token = CancelToken::new();
        let (_tx, rx) = broadcast::channel(1);
        let (mock, trait_obj) = session();

        let err = wait_for_terminal(&token, Duration::from_secs(1), rx, &trait_obj)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "terminal session timed out (maximum time allowed - 1s)"
        );
        assert_eq!(mock.close_count(), 1);
    }

    #[tokio::test]
    async fn test_system_interrupt_disconnects() {
        let token = CancelToken::new();
        let (tx, rx) = broadcast::channel(1);
        let (mock, trait_obj) = session();

        tx.send(Signal::Interrupt).unwrap();
        let err = wait_for_terminal(&token, Duration::from_secs(3600), rx, &trait_obj)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "terminal disconnected by system signal: interrupt"
        );
        assert_eq!(mock.close_count(), 1);
    }

    #[tokio::test]
    async fn test_signal_cause_through_token_keeps_text() {
        let token = CancelToken::new();
        let (_tx, rx) = broadcast::channel(1);
        let (mock, trait_obj) = session();

        token.cancel(CancellationCause::system_signal(Signal::Terminate));
        let err = wait_for_terminal(&token, Duration::from_secs(3600), rx, &trait_obj)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "terminal disconnected by system signal: terminate"
        );
        assert_eq!(mock.close_count(), 1);
    }

    #[tokio::test]
    async fn test_peer_disconnect_via_hub() {
        let hub = CancellationHub::new();
        let (_tx, rx) = broadcast::channel(1);
        let (mock, trait_obj) = session();
        hub.watch_session(trait_obj.clone());

        mock.disconnect("user disconnect");
        let token = hub.token();
        let err = wait_for_terminal(&token, Duration::from_secs(3600), rx, &trait_obj)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "terminal disconnected: user disconnect");
        assert_eq!(mock.close_count(), 1);
    }
}
