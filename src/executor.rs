//! Executor contracts and the executor/shell registry.
//!
//! An [`Executor`] is the pluggable backend that runs one generated script
//! per stage. The orchestration core drives its lifecycle:
//! `create -> prepare (with retries) -> run* -> cleanup -> finish`.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::cancellation::CancelToken;
use crate::context::{BuildContext, RunnerConfig};
use crate::errors::RunnerError;
use crate::plan::BuildStage;
use crate::shell::ScriptGenerator;

/// Capabilities reported by an executor provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeaturesInfo {
    /// The execution environment is shared between builds (e.g. a host
    /// shell). Drives `CI_SHARED_ENVIRONMENT` / `CI_DISPOSABLE_ENVIRONMENT`.
    pub shared: bool,
    /// Interactive terminal sessions can be attached.
    pub terminal: bool,
}

/// Script-generation context returned by [`Executor::shell`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellScriptInfo {
    /// Name of the script generator to use; empty means the provider's
    /// default shell.
    pub shell: String,
}

impl ShellScriptInfo {
    /// Creates an info naming `shell`.
    #[must_use]
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

/// One stage execution request.
#[derive(Debug, Clone)]
pub struct ExecutorCommand {
    /// Stage being executed.
    pub stage: BuildStage,
    /// Generated script for the stage.
    pub script: String,
    /// True for the fixed prologue/epilogue stages, false for user stages.
    pub predefined: bool,
}

/// Inputs handed to [`Executor::prepare`].
///
/// `config` is an owned deep copy: an executor may freely mutate it while
/// preparing without ever touching the caller's configuration.
#[derive(Clone)]
pub struct ExecutorPrepareOptions<'a> {
    /// Private copy of the runner configuration.
    pub config: RunnerConfig,
    /// The build being prepared.
    pub build: &'a BuildContext,
    /// Cancellation token covering the whole pipeline.
    pub token: CancelToken,
}

impl std::fmt::Debug for ExecutorPrepareOptions<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorPrepareOptions")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A pluggable execution backend for one build.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Returns the script-generation context for this executor.
    fn shell(&self) -> ShellScriptInfo;

    /// Prepares the execution environment.
    ///
    /// Transient failures are reported as [`RunnerError::Transient`] and
    /// repeated by the prepare policy on a fresh executor.
    async fn prepare(&self, options: ExecutorPrepareOptions<'_>) -> Result<(), RunnerError>;

    /// Runs one stage script.
    async fn run(&self, command: ExecutorCommand) -> Result<(), RunnerError>;

    /// Releases resources. Called exactly once per created executor, on
    /// every exit path.
    async fn cleanup(&self);

    /// Observes the terminal outcome. Called exactly once, after `cleanup`,
    /// on the executor that survived preparation.
    async fn finish(&self, result: Option<&RunnerError>);
}

/// Factory for executors, with capability queries.
pub trait ExecutorProvider: Send + Sync {
    /// Returns true when the provider can currently create executors.
    fn can_create(&self) -> bool;

    /// Name of the shell used when an executor does not name one.
    fn default_shell(&self) -> String;

    /// Fills in the capabilities of executors created by this provider.
    fn get_features(&self, features: &mut FeaturesInfo) -> Result<(), RunnerError>;

    /// Creates a fresh executor, or `None` when creation is impossible.
    fn create(&self) -> Option<Box<dyn Executor>>;
}

/// Registry mapping executor names to providers and shell names to script
/// generators.
///
/// The registry is owned by the host and passed into each build through the
/// system configuration; tests inject their own instance.
#[derive(Default)]
pub struct Registry {
    providers: DashMap<String, Arc<dyn ExecutorProvider>>,
    shells: DashMap<String, Arc<dyn ScriptGenerator>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor provider under `name`.
    ///
    /// Registering the same name twice is a host programming error.
    pub fn register_executor_provider(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn ExecutorProvider>,
    ) -> Result<(), RunnerError> {
        let name = name.into();
        if self.providers.contains_key(&name) {
            return Err(RunnerError::system(format!(
                "executor provider already registered: {name}"
            )));
        }
        self.providers.insert(name, provider);
        Ok(())
    }

    /// Looks up an executor provider.
    #[must_use]
    pub fn executor_provider(&self, name: &str) -> Option<Arc<dyn ExecutorProvider>> {
        self.providers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Registers a script generator under its own name.
    pub fn register_shell(&self, shell: Arc<dyn ScriptGenerator>) -> Result<(), RunnerError> {
        let name = shell.name().to_string();
        if self.shells.contains_key(&name) {
            return Err(RunnerError::system(format!(
                "shell already registered: {name}"
            )));
        }
        self.shells.insert(name, shell);
        Ok(())
    }

    /// Looks up a script generator.
    #[must_use]
    pub fn shell(&self, name: &str) -> Option<Arc<dyn ScriptGenerator>> {
        self.shells.get(name).map(|entry| Arc::clone(entry.value()))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("providers", &self.providers.len())
            .field("shells", &self.shells.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::ScriptOutcome;

    struct DummyShell;

    impl ScriptGenerator for DummyShell {
        fn name(&self) -> &str {
            "dummy"
        }

        fn generate_script(
            &self,
            _stage: &BuildStage,
            _info: &ShellScriptInfo,
        ) -> Result<ScriptOutcome, RunnerError> {
            Ok(ScriptOutcome::Run("echo".to_string()))
        }
    }

    #[test]
    fn test_registry_shell_roundtrip() {
        let registry = Registry::new();
        registry.register_shell(Arc::new(DummyShell)).unwrap();

        assert!(registry.shell("dummy").is_some());
        assert!(registry.shell("missing").is_none());
    }

    #[test]
    fn test_registry_rejects_duplicate_shell() {
        let registry = Registry::new();
        registry.register_shell(Arc::new(DummyShell)).unwrap();
        let err = registry.register_shell(Arc::new(DummyShell)).unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn test_missing_provider_lookup() {
        let registry = Registry::new();
        assert!(registry.executor_provider("docker").is_none());
    }
}
