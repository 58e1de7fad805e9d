//! Job trace contract and the default masking writer.
//!
//! The trace is the byte stream the coordinator shows to the user. The core
//! serializes its own writes; masking is applied before any byte leaves the
//! process.

use parking_lot::{Mutex, RwLock};
use std::io::Write;
use tracing::error;

use crate::errors::{FailureReason, RunnerError};

/// Replacement emitted for masked values.
pub const MASK_REPLACEMENT: &str = "[MASKED]";

/// Cancel function installed by the pipeline.
pub type CancelFn = Box<dyn Fn() + Send + Sync>;

/// Sink for the build's output and terminal status.
pub trait JobTrace: Send + Sync {
    /// Appends bytes to the trace.
    fn write(&self, data: &[u8]);

    /// Returns true when the trace is attached to stdout.
    fn is_stdout(&self) -> bool;

    /// Installs the function invoked when the user cancels the job.
    fn set_cancel_fn(&self, cancel: CancelFn);

    /// Installs the values that must never appear in the trace.
    fn set_masked(&self, values: Vec<String>);

    /// Records the terminal failure of the job.
    fn fail(&self, error: &RunnerError, reason: FailureReason);
}

/// A [`JobTrace`] writing to any `io::Write` sink with value masking.
pub struct Trace {
    writer: Mutex<Box<dyn Write + Send>>,
    masked: RwLock<Vec<String>>,
    cancel: Mutex<Option<CancelFn>>,
    stdout: bool,
}

impl Trace {
    /// Creates a trace over an arbitrary writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
            masked: RwLock::new(Vec::new()),
            cancel: Mutex::new(None),
            stdout: false,
        }
    }

    /// Creates a trace writing to the process stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self {
            writer: Mutex::new(Box::new(std::io::stdout())),
            masked: RwLock::new(Vec::new()),
            cancel: Mutex::new(None),
            stdout: true,
        }
    }

    /// Invokes the installed cancel function, if any.
    pub fn cancel(&self) {
        if let Some(cancel) = self.cancel.lock().as_ref() {
            cancel();
        }
    }

    fn apply_mask(&self, data: &[u8]) -> Vec<u8> {
        let mut text = String::from_utf8_lossy(data).into_owned();
        for value in self.masked.read().iter() {
            text = text.replace(value, MASK_REPLACEMENT);
        }
        text.into_bytes()
    }
}

impl JobTrace for Trace {
    fn write(&self, data: &[u8]) {
        let masked = self.apply_mask(data);
        let mut writer = self.writer.lock();
        if let Err(err) = writer.write_all(&masked) {
            error!(error = %err, "failed to write job trace");
        }
        let _ = writer.flush();
    }

    fn is_stdout(&self) -> bool {
        self.stdout
    }

    fn set_cancel_fn(&self, cancel: CancelFn) {
        *self.cancel.lock() = Some(cancel);
    }

    fn set_masked(&self, values: Vec<String>) {
        *self.masked.write() = values;
    }

    fn fail(&self, error: &RunnerError, reason: FailureReason) {
        self.write(format!("\nERROR: Job failed: {error} ({reason})\n").as_bytes());
    }
}

impl std::fmt::Debug for Trace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trace")
            .field("stdout", &self.stdout)
            .field("masked_values", &self.masked.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_masks_values() {
        let buf = SharedBuf::default();
        let trace = Trace::new(Box::new(buf.clone()));
        trace.set_masked(vec!["s3cret".to_string()]);

        trace.write(b"token is s3cret, keep it safe");

        let written = String::from_utf8(buf.0.lock().clone()).unwrap();
        assert_eq!(written, "token is [MASKED], keep it safe");
    }

    #[test]
    fn test_cancel_fn_roundtrip() {
        let trace = Trace::new(Box::new(std::io::sink()));
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        trace.set_cancel_fn(Box::new(move || flag.store(true, Ordering::SeqCst)));

        trace.cancel();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_fail_writes_reason() {
        let buf = SharedBuf::default();
        let trace = Trace::new(Box::new(buf.clone()));
        trace.fail(
            &RunnerError::system("executor not found"),
            FailureReason::RunnerSystemFailure,
        );

        let written = String::from_utf8(buf.0.lock().clone()).unwrap();
        assert!(written.contains("executor not found"));
        assert!(written.contains("runner_system_failure"));
    }

    #[test]
    fn test_stdout_flag() {
        assert!(Trace::stdout().is_stdout());
        assert!(!Trace::new(Box::new(std::io::sink())).is_stdout());
    }
}
