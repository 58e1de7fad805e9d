//! The pipeline engine driving a build through its executor.
//!
//! `BuildContext::run` is the single entry point: it resolves the executor
//! provider, prepares an executor under the prepare retry policy, drives the
//! stage plan, and guarantees the teardown pair (`cleanup` then `finish`) on
//! the retained executor for every exit path.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cancellation::{CancelToken, CancellationHub};
use crate::context::{BuildContext, SystemConfig};
use crate::errors::RunnerError;
use crate::executor::{
    Executor, ExecutorCommand, ExecutorPrepareOptions, ExecutorProvider, FeaturesInfo,
    ShellScriptInfo,
};
use crate::features;
use crate::plan::{BuildStage, StagePlan};
use crate::retry::{self, RetryPolicy};
use crate::shell::{ScriptGenerator, ScriptOutcome};
use crate::terminal::wait_for_terminal;
use crate::trace::JobTrace;

use super::state::BuildState;

impl BuildContext {
    /// Runs the build to completion.
    ///
    /// On failure the trace receives `fail` with the classified reason and
    /// the same error is returned to the host for exit-code mapping.
    pub async fn run(
        &self,
        config: &SystemConfig,
        trace: Arc<dyn JobTrace>,
    ) -> Result<(), RunnerError> {
        info!(
            job_id = self.job().id,
            correlation_id = %self.correlation_id(),
            executor = %self.runner().settings.executor,
            "running build"
        );

        let result = self.run_inner(config, &trace).await;

        let duration_ms = Utc::now()
            .signed_duration_since(self.started_at())
            .num_milliseconds();
        match &result {
            Ok(()) => info!(job_id = self.job().id, duration_ms, "job succeeded"),
            Err(err) => {
                warn!(
                    job_id = self.job().id,
                    duration_ms,
                    error = %err,
                    reason = %err.failure_reason(),
                    "job failed"
                );
                trace.fail(err, err.failure_reason());
            }
        }
        self.transition_to(BuildState::Finished);
        result
    }

    async fn run_inner(
        &self,
        config: &SystemConfig,
        trace: &Arc<dyn JobTrace>,
    ) -> Result<(), RunnerError> {
        let executor_name = self.runner().settings.executor.clone();
        let Some(provider) = config.registry.executor_provider(&executor_name) else {
            self.transition_to(BuildState::Failed);
            return Err(RunnerError::system(format!(
                "executor not found: {executor_name}"
            )));
        };
        if !provider.can_create() {
            self.transition_to(BuildState::Failed);
            return Err(RunnerError::system("failed to create executor"));
        }
        let mut executor_features = FeaturesInfo::default();
        if let Err(err) = provider.get_features(&mut executor_features) {
            self.transition_to(BuildState::Failed);
            return Err(err);
        }
        self.set_executor_features(executor_features);

        trace.set_masked(self.all_variables().masked_values());

        let hub = CancellationHub::new();
        let token = hub.token();
        hub.arm_deadline(self.build_timeout(config.max_build_time));
        trace.set_cancel_fn(Box::new(hub.cancel_fn()));
        hub.watch_signal(self.subscribe_signals());
        if let Some(session) = self.session() {
            hub.watch_session(session);
        }

        self.transition_to(BuildState::Preparing);
        let executor = match self.prepare_executor(config, &provider, &token).await {
            Ok(executor) => executor,
            Err(err) => {
                self.transition_to(BuildState::Failed);
                return Err(err);
            }
        };

        let shell_info = executor.shell();
        let shell_name = if shell_info.shell.is_empty() {
            provider.default_shell()
        } else {
            shell_info.shell
        };
        let info = ShellScriptInfo::new(shell_name);

        let result = self.run_prepared(config, executor.as_ref(), &info, &token).await;

        if let Some(session) = self.session() {
            if let Err(err) = wait_for_terminal(
                &token,
                config.terminal_wait_timeout,
                self.subscribe_signals(),
                &session,
            )
            .await
            {
                warn!(error = %err, "terminal session ended");
            }
        }

        executor.cleanup().await;
        executor.finish(result.as_ref().err()).await;
        result
    }

    /// Creates and prepares an executor under the prepare policy.
    ///
    /// A failed attempt cleans up its executor and the next attempt starts
    /// from a fresh `create`. Build errors short-circuit; so does an
    /// observed cancellation.
    async fn prepare_executor(
        &self,
        config: &SystemConfig,
        provider: &Arc<dyn ExecutorProvider>,
        token: &CancelToken,
    ) -> Result<Box<dyn Executor>, RunnerError> {
        let policy = RetryPolicy::prepare(config.preparation_retry_interval)
            .with_max_attempts(config.preparation_retries + 1);

        retry::run_with_retry(
            &policy,
            token,
            || {
                let provider = Arc::clone(provider);
                let token = token.clone();
                async move {
                    let executor = provider
                        .create()
                        .ok_or_else(|| RunnerError::system("failed to create executor"))?;
                    let options = ExecutorPrepareOptions {
                        config: self.runner().clone(),
                        build: self,
                        token: token.clone(),
                    };
                    debug!("preparing executor");
                    let prepared = tokio::select! {
                        result = executor.prepare(options) => result,
                        cause = token.cancelled() => Err(cause.to_error()),
                    };
                    match prepared {
                        Ok(()) => Ok(executor),
                        Err(err) => {
                            executor.cleanup().await;
                            Err(err)
                        }
                    }
                }
            },
            RunnerError::is_retryable,
        )
        .await
    }

    async fn run_prepared(
        &self,
        config: &SystemConfig,
        executor: &dyn Executor,
        info: &ShellScriptInfo,
        token: &CancelToken,
    ) -> Result<(), RunnerError> {
        let Some(generator) = config.registry.shell(&info.shell) else {
            self.transition_to(BuildState::Failed);
            return Err(RunnerError::system(format!(
                "shell not found: {}",
                info.shell
            )));
        };

        self.transition_to(BuildState::Running);
        self.execute_stages(config, executor, &generator, info, token)
            .await
    }

    async fn execute_stages(
        &self,
        config: &SystemConfig,
        executor: &dyn Executor,
        generator: &Arc<dyn ScriptGenerator>,
        info: &ShellScriptInfo,
        token: &CancelToken,
    ) -> Result<(), RunnerError> {
        let plan = StagePlan::from_job(self.job(), &self.all_variables());

        let mut result: Result<(), RunnerError> = Ok(());
        let mut prologue_succeeded = true;

        for stage in plan.prologue() {
            if let Some(cause) = token.cause() {
                result = Err(cause.to_error());
                prologue_succeeded = false;
                break;
            }
            if let Err(err) = self
                .execute_stage(executor, generator, info, &plan, stage, token)
                .await
            {
                result = Err(err);
                prologue_succeeded = false;
                break;
            }
        }

        if result.is_ok() {
            for stage in plan.user_stages() {
                if let Some(cause) = token.cause() {
                    result = Err(cause.to_error());
                    break;
                }
                if let Err(err) = self
                    .execute_stage(executor, generator, info, &plan, stage, token)
                    .await
                {
                    result = Err(err);
                    break;
                }
            }
        }

        let success = result.is_ok();
        if token.is_cancelled() {
            self.transition_to(BuildState::Cancelled);
        } else if success {
            self.transition_to(BuildState::EpilogueSuccess);
        } else {
            self.transition_to(BuildState::EpilogueFailure);
        }

        // A cancelled build still runs its failure epilogue, bounded by a
        // fresh grace deadline instead of the already-fired token.
        let (epilogue_token, _epilogue_hub) = if token.is_cancelled() {
            let hub = CancellationHub::new();
            hub.arm_deadline(config.epilogue_grace);
            (hub.token(), Some(hub))
        } else {
            (token.clone(), None)
        };

        for stage in plan.epilogue(success, prologue_succeeded) {
            match self
                .execute_stage(executor, generator, info, &plan, &stage, &epilogue_token)
                .await
            {
                Ok(()) => {}
                Err(err) => {
                    if result.is_ok() {
                        result = Err(err);
                    } else {
                        warn!(stage = %stage, error = %err, "epilogue stage failed");
                    }
                }
            }
        }

        result
    }

    async fn execute_stage(
        &self,
        executor: &dyn Executor,
        generator: &Arc<dyn ScriptGenerator>,
        info: &ShellScriptInfo,
        plan: &StagePlan,
        stage: &BuildStage,
        token: &CancelToken,
    ) -> Result<(), RunnerError> {
        let attempts = plan.attempts(stage)?;
        let policy = RetryPolicy::stage(attempts);

        retry::run_with_retry(
            &policy,
            token,
            || {
                let stage = stage.clone();
                let generator = Arc::clone(generator);
                async move {
                    self.run_stage_once(executor, generator.as_ref(), info, &stage, token)
                        .await
                }
            },
            RunnerError::is_retryable,
        )
        .await
    }

    async fn run_stage_once(
        &self,
        executor: &dyn Executor,
        generator: &dyn ScriptGenerator,
        info: &ShellScriptInfo,
        stage: &BuildStage,
        token: &CancelToken,
    ) -> Result<(), RunnerError> {
        let script = match generator.generate_script(stage, info)? {
            ScriptOutcome::Run(script) => script,
            ScriptOutcome::NoOp(script) => {
                if self.is_feature_flag_on(features::SKIP_NOOP_BUILD_STAGES) {
                    debug!(stage = %stage, "skipping no-op build stage");
                    return Ok(());
                }
                script
            }
        };

        info!(stage = %stage, "executing build stage");
        let command = ExecutorCommand {
            stage: stage.clone(),
            script,
            predefined: stage.is_predefined(),
        };
        tokio::select! {
            result = executor.run(command) => result,
            cause = token.cancelled() => Err(cause.to_error()),
        }
    }
}
