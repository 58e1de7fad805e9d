//! Test doubles for the executor, shell, trace and session contracts.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::errors::{FailureReason, RunnerError};
use crate::executor::{
    Executor, ExecutorCommand, ExecutorPrepareOptions, ExecutorProvider, FeaturesInfo,
    ShellScriptInfo,
};
use crate::plan::BuildStage;
use crate::shell::{ScriptGenerator, ScriptOutcome};
use crate::terminal::InteractiveSession;
use crate::trace::{CancelFn, JobTrace};

type PrepareHook =
    Box<dyn Fn(&ExecutorPrepareOptions<'_>) -> Result<(), RunnerError> + Send + Sync>;

/// Shared script and recorder for mock executors.
///
/// One control is shared by a [`MockExecutorProvider`] and every executor it
/// creates, so prepare-retry tests can observe lifecycle calls across all
/// executor instances of a build.
pub struct MockExecutorControl {
    shell: String,
    prepare_failures: Mutex<VecDeque<RunnerError>>,
    prepare_hook: Mutex<Option<PrepareHook>>,
    stage_failures: Mutex<HashMap<String, VecDeque<RunnerError>>>,
    stage_delays: Mutex<HashMap<String, Duration>>,
    create_calls: AtomicUsize,
    prepare_calls: AtomicUsize,
    cleanup_calls: AtomicUsize,
    run_stages: Mutex<Vec<String>>,
    finish_results: Mutex<Vec<Option<String>>>,
    lifecycle: Mutex<Vec<String>>,
}

impl MockExecutorControl {
    /// Creates a control whose executors report the given shell name.
    #[must_use]
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            prepare_failures: Mutex::new(VecDeque::new()),
            prepare_hook: Mutex::new(None),
            stage_failures: Mutex::new(HashMap::new()),
            stage_delays: Mutex::new(HashMap::new()),
            create_calls: AtomicUsize::new(0),
            prepare_calls: AtomicUsize::new(0),
            cleanup_calls: AtomicUsize::new(0),
            run_stages: Mutex::new(Vec::new()),
            finish_results: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(Vec::new()),
        }
    }

    /// Queues `error` for the next `count` prepare calls.
    pub fn fail_prepare_times(&self, error: RunnerError, count: usize) {
        let mut failures = self.prepare_failures.lock();
        for _ in 0..count {
            failures.push_back(error.clone());
        }
    }

    /// Installs a hook invoked on every prepare call before the scripted
    /// failures are consumed.
    pub fn set_prepare_hook<F>(&self, hook: F)
    where
        F: Fn(&ExecutorPrepareOptions<'_>) -> Result<(), RunnerError> + Send + Sync + 'static,
    {
        *self.prepare_hook.lock() = Some(Box::new(hook));
    }

    /// Queues `error` for the next `count` runs of `stage`.
    pub fn fail_stage_times(&self, stage: &str, error: RunnerError, count: usize) {
        let mut failures = self.stage_failures.lock();
        let queue = failures.entry(stage.to_string()).or_default();
        for _ in 0..count {
            queue.push_back(error.clone());
        }
    }

    /// Makes every run of `stage` sleep for `delay` before completing.
    pub fn delay_stage(&self, stage: &str, delay: Duration) {
        self.stage_delays.lock().insert(stage.to_string(), delay);
    }

    /// Number of executors created by the provider.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of prepare calls across all executors.
    #[must_use]
    pub fn prepare_count(&self) -> usize {
        self.prepare_calls.load(Ordering::SeqCst)
    }

    /// Number of cleanup calls across all executors.
    #[must_use]
    pub fn cleanup_count(&self) -> usize {
        self.cleanup_calls.load(Ordering::SeqCst)
    }

    /// Stage names passed to `run`, in call order.
    #[must_use]
    pub fn run_stages(&self) -> Vec<String> {
        self.run_stages.lock().clone()
    }

    /// Recorded `finish` outcomes; `None` is a successful build.
    #[must_use]
    pub fn finish_results(&self) -> Vec<Option<String>> {
        self.finish_results.lock().clone()
    }

    /// Every lifecycle event (`create`, `prepare`, `run:<stage>`, `cleanup`,
    /// `finish`) in observation order.
    #[must_use]
    pub fn lifecycle(&self) -> Vec<String> {
        self.lifecycle.lock().clone()
    }

    fn record(&self, event: impl Into<String>) {
        self.lifecycle.lock().push(event.into());
    }
}

impl std::fmt::Debug for MockExecutorControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockExecutorControl")
            .field("shell", &self.shell)
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}

/// A scripted [`Executor`] recording into its shared control.
#[derive(Debug)]
pub struct MockExecutor {
    control: Arc<MockExecutorControl>,
}

#[async_trait]
impl Executor for MockExecutor {
    fn shell(&self) -> ShellScriptInfo {
        ShellScriptInfo::new(self.control.shell.clone())
    }

    async fn prepare(&self, options: ExecutorPrepareOptions<'_>) -> Result<(), RunnerError> {
        self.control.prepare_calls.fetch_add(1, Ordering::SeqCst);
        self.control.record("prepare");
        if let Some(hook) = self.control.prepare_hook.lock().as_ref() {
            hook(&options)?;
        }
        match self.control.prepare_failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn run(&self, command: ExecutorCommand) -> Result<(), RunnerError> {
        let stage = command.stage.to_string();
        self.control.run_stages.lock().push(stage.clone());
        self.control.record(format!("run:{stage}"));

        let delay = self.control.stage_delays.lock().get(&stage).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .control
            .stage_failures
            .lock()
            .get_mut(&stage)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn cleanup(&self) {
        self.control.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        self.control.record("cleanup");
    }

    async fn finish(&self, result: Option<&RunnerError>) {
        self.control
            .finish_results
            .lock()
            .push(result.map(ToString::to_string));
        self.control.record("finish");
    }
}

/// Provider handing out [`MockExecutor`]s bound to one control.
pub struct MockExecutorProvider {
    control: Arc<MockExecutorControl>,
    features: FeaturesInfo,
    can_create: bool,
}

impl MockExecutorProvider {
    /// Creates a provider around `control`.
    #[must_use]
    pub fn new(control: Arc<MockExecutorControl>) -> Self {
        Self {
            control,
            features: FeaturesInfo::default(),
            can_create: true,
        }
    }

    /// Overrides the reported features.
    #[must_use]
    pub fn with_features(mut self, features: FeaturesInfo) -> Self {
        self.features = features;
        self
    }

    /// Makes `can_create` report false.
    #[must_use]
    pub fn refusing_creation(mut self) -> Self {
        self.can_create = false;
        self
    }
}

impl ExecutorProvider for MockExecutorProvider {
    fn can_create(&self) -> bool {
        self.can_create
    }

    fn default_shell(&self) -> String {
        self.control.shell.clone()
    }

    fn get_features(&self, features: &mut FeaturesInfo) -> Result<(), RunnerError> {
        *features = self.features;
        Ok(())
    }

    fn create(&self) -> Option<Box<dyn Executor>> {
        self.control.create_calls.fetch_add(1, Ordering::SeqCst);
        self.control.record("create");
        Some(Box::new(MockExecutor {
            control: Arc::clone(&self.control),
        }))
    }
}

impl std::fmt::Debug for MockExecutorProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockExecutorProvider")
            .field("can_create", &self.can_create)
            .finish_non_exhaustive()
    }
}

/// A [`ScriptGenerator`] returning `"script"` for every stage.
#[derive(Debug)]
pub struct MockScriptGenerator {
    name: String,
    noop_stages: Mutex<HashSet<String>>,
    failures: Mutex<HashMap<String, RunnerError>>,
}

impl MockScriptGenerator {
    /// Creates a generator registered under `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            noop_stages: Mutex::new(HashSet::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Marks `stage` as generating a no-op script.
    pub fn mark_noop(&self, stage: &str) {
        self.noop_stages.lock().insert(stage.to_string());
    }

    /// Makes generation fail for `stage`.
    pub fn fail_stage(&self, stage: &str, error: RunnerError) {
        self.failures.lock().insert(stage.to_string(), error);
    }
}

impl ScriptGenerator for MockScriptGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_script(
        &self,
        stage: &BuildStage,
        _info: &ShellScriptInfo,
    ) -> Result<ScriptOutcome, RunnerError> {
        let stage = stage.to_string();
        if let Some(error) = self.failures.lock().get(&stage) {
            return Err(error.clone());
        }
        if self.noop_stages.lock().contains(&stage) {
            return Ok(ScriptOutcome::NoOp("script".to_string()));
        }
        Ok(ScriptOutcome::Run("script".to_string()))
    }
}

/// A [`JobTrace`] recording everything it receives.
#[derive(Default)]
pub struct RecordingTrace {
    written: Mutex<Vec<u8>>,
    masked: Mutex<Vec<String>>,
    cancel: Mutex<Option<CancelFn>>,
    failures: Mutex<Vec<(String, FailureReason)>>,
}

impl RecordingTrace {
    /// Creates an empty recording trace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Invokes the installed cancel function, as the user cancel button
    /// would.
    pub fn trigger_cancel(&self) {
        if let Some(cancel) = self.cancel.lock().as_ref() {
            cancel();
        }
    }

    /// Everything written so far, lossily decoded.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.written.lock()).into_owned()
    }

    /// Masked values installed by the pipeline.
    #[must_use]
    pub fn masked(&self) -> Vec<String> {
        self.masked.lock().clone()
    }

    /// Recorded `fail` calls.
    #[must_use]
    pub fn failures(&self) -> Vec<(String, FailureReason)> {
        self.failures.lock().clone()
    }
}

impl JobTrace for RecordingTrace {
    fn write(&self, data: &[u8]) {
        self.written.lock().extend_from_slice(data);
    }

    fn is_stdout(&self) -> bool {
        false
    }

    fn set_cancel_fn(&self, cancel: CancelFn) {
        *self.cancel.lock() = Some(cancel);
    }

    fn set_masked(&self, values: Vec<String>) {
        *self.masked.lock() = values;
    }

    fn fail(&self, error: &RunnerError, reason: FailureReason) {
        self.failures.lock().push((error.to_string(), reason));
    }
}

impl std::fmt::Debug for RecordingTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingTrace")
            .field("failures", &self.failures())
            .finish_non_exhaustive()
    }
}

/// An [`InteractiveSession`] driven by the test.
pub struct MockSession {
    disconnect_message: Mutex<Option<String>>,
    notify: Notify,
    closed: AtomicUsize,
    connected: AtomicBool,
}

impl MockSession {
    /// Creates a connected session with no pending disconnect.
    #[must_use]
    pub fn new() -> Self {
        Self {
            disconnect_message: Mutex::new(None),
            notify: Notify::new(),
            closed: AtomicUsize::new(0),
            connected: AtomicBool::new(true),
        }
    }

    /// Simulates the peer disconnecting with `reason`.
    pub fn disconnect(&self, reason: impl Into<String>) {
        *self.disconnect_message.lock() = Some(reason.into());
        self.notify.notify_one();
    }

    /// How often `close` was called.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InteractiveSession for MockSession {
    async fn disconnected(&self) -> String {
        loop {
            if let Some(message) = self.disconnect_message.lock().take() {
                return message;
            }
            self.notify.notified().await;
        }
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MockSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSession")
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .field("close_count", &self.close_count())
            .finish()
    }
}
