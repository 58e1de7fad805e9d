//! Canned job responses and harness helpers for tests.

use std::sync::Arc;
use std::time::Duration;

use crate::context::{
    Artifact, ArtifactWhen, GitInfo, JobResponse, RunnerConfig, RunnerCredentials,
    RunnerInfo, RunnerSettings, Step, StepWhen, SystemConfig, STEP_NAME_AFTER_SCRIPT,
    STEP_NAME_RELEASE, STEP_NAME_SCRIPT,
};
use crate::executor::{ExecutorProvider, Registry};
use crate::shell::ScriptGenerator;

/// Shell name used by the mock executors and generators.
pub const TEST_SHELL: &str = "script-shell";

/// A job with one script step, an after-script and an always-uploaded
/// artifact.
#[must_use]
pub fn successful_job() -> JobResponse {
    JobResponse {
        id: 1,
        git_info: GitInfo {
            repo_url: "https://gitlab.example.com/test-namespace/test-repo.git".to_string(),
            ref_name: "main".to_string(),
            sha: "0000000000000000000000000000000000000000".to_string(),
        },
        steps: vec![
            Step::new(STEP_NAME_SCRIPT, vec!["echo hello".to_string()]),
            Step {
                name: STEP_NAME_AFTER_SCRIPT.to_string(),
                script: vec!["echo after".to_string()],
                when: StepWhen::Always,
                allow_failure: true,
            },
        ],
        artifacts: vec![Artifact {
            name: "build-output".to_string(),
            untracked: false,
            paths: vec!["out/*".to_string()],
            when: ArtifactWhen::Always,
        }],
        runner_info: RunnerInfo { timeout: 3600 },
        ..JobResponse::default()
    }
}

/// [`successful_job`] with an additional release step.
#[must_use]
pub fn multistep_job() -> JobResponse {
    let mut job = successful_job();
    job.steps.insert(
        1,
        Step::new(STEP_NAME_RELEASE, vec!["echo release".to_string()]),
    );
    job
}

/// A runner configuration pointing at `executor`.
#[must_use]
pub fn runner_config(executor: &str) -> RunnerConfig {
    RunnerConfig {
        settings: RunnerSettings {
            executor: executor.to_string(),
            ..RunnerSettings::default()
        },
        credentials: RunnerCredentials {
            token: "z3jYviTzWb-test-token".to_string(),
        },
    }
}

/// A registry with one provider and one shell registered.
#[must_use]
pub fn test_registry(
    executor: &str,
    provider: Arc<dyn ExecutorProvider>,
    shell: Arc<dyn ScriptGenerator>,
) -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    registry
        .register_executor_provider(executor, provider)
        .expect("register provider");
    registry.register_shell(shell).expect("register shell");
    registry
}

/// A system config with the prepare retry delay removed.
#[must_use]
pub fn test_system_config(registry: Arc<Registry>) -> SystemConfig {
    SystemConfig::new(registry).with_preparation_retry_interval(Duration::ZERO)
}
