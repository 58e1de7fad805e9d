//! The job description received from the coordinator.
//!
//! A [`JobResponse`] is immutable for the lifetime of a build; the
//! orchestration core only reads it.

use serde::{Deserialize, Serialize};

use crate::variables::JobVariable;

/// Step name the coordinator uses for the main user script.
pub const STEP_NAME_SCRIPT: &str = "script";
/// Step name for the optional release step.
pub const STEP_NAME_RELEASE: &str = "release";
/// Step name for the after-script hook.
pub const STEP_NAME_AFTER_SCRIPT: &str = "after_script";

/// Identity of the job's project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    /// Numeric project id.
    #[serde(default)]
    pub project_id: u64,
    /// Human readable project name.
    #[serde(default)]
    pub project_name: String,
}

/// Git coordinates of the job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    /// URL the sources are fetched from when no clone-URL override is set.
    #[serde(default)]
    pub repo_url: String,
    /// Ref to check out.
    #[serde(default)]
    pub ref_name: String,
    /// Commit to check out.
    #[serde(default)]
    pub sha: String,
}

/// Container image requested by the job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Image reference; may contain variable references.
    #[serde(default)]
    pub name: String,
}

/// When a step is executed relative to the outcome of earlier steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepWhen {
    /// Run only while the build is still succeeding.
    OnSuccess,
    /// Run only once the build has failed.
    OnFailure,
    /// Run regardless of the outcome.
    Always,
}

impl Default for StepWhen {
    fn default() -> Self {
        Self::OnSuccess
    }
}

/// A single scripted step declared by the job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Step name; user stages are derived as `step_<name>`.
    pub name: String,
    /// Script lines to execute.
    #[serde(default)]
    pub script: Vec<String>,
    /// Execution condition.
    #[serde(default)]
    pub when: StepWhen,
    /// Whether a failure of this step fails the build.
    #[serde(default)]
    pub allow_failure: bool,
}

impl Step {
    /// Creates a step running `script` on success.
    #[must_use]
    pub fn new(name: impl Into<String>, script: Vec<String>) -> Self {
        Self {
            name: name.into(),
            script,
            when: StepWhen::OnSuccess,
            allow_failure: false,
        }
    }
}

/// Upload condition of a declared artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactWhen {
    /// Upload only when the build succeeded.
    OnSuccess,
    /// Upload only when the build failed.
    OnFailure,
    /// Upload in both cases.
    Always,
}

impl Default for ArtifactWhen {
    fn default() -> Self {
        Self::OnSuccess
    }
}

impl ArtifactWhen {
    /// Returns true when an artifact with this condition must be uploaded
    /// for the given outcome.
    #[must_use]
    pub fn should_upload(self, success: bool) -> bool {
        match self {
            Self::OnSuccess => success,
            Self::OnFailure => !success,
            Self::Always => true,
        }
    }
}

/// An artifact declaration from the job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact name.
    #[serde(default)]
    pub name: String,
    /// Include untracked files.
    #[serde(default)]
    pub untracked: bool,
    /// Path globs to collect.
    #[serde(default)]
    pub paths: Vec<String>,
    /// Upload condition.
    #[serde(default)]
    pub when: ArtifactWhen,
}

/// Runner-facing metadata attached to the job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerInfo {
    /// Job timeout in seconds; `0` means unset.
    #[serde(default)]
    pub timeout: u64,
}

/// The complete job payload handed to the orchestration core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResponse {
    /// Job id assigned by the coordinator.
    pub id: u64,
    /// Project identity.
    #[serde(default)]
    pub job_info: JobInfo,
    /// Git coordinates.
    #[serde(default)]
    pub git_info: GitInfo,
    /// Requested image.
    #[serde(default)]
    pub image: Image,
    /// Declared variables, in declaration order.
    #[serde(default)]
    pub variables: Vec<JobVariable>,
    /// Scripted steps, in execution order.
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Declared artifacts.
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    /// Runner metadata.
    #[serde(default)]
    pub runner_info: RunnerInfo,
}

impl JobResponse {
    /// Returns the steps that become user stages, i.e. everything except
    /// the after-script hook.
    pub fn user_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps
            .iter()
            .filter(|s| s.name != STEP_NAME_AFTER_SCRIPT)
    }

    /// Returns true when the job declares a non-empty after-script.
    #[must_use]
    pub fn has_after_script(&self) -> bool {
        self.steps
            .iter()
            .any(|s| s.name == STEP_NAME_AFTER_SCRIPT && !s.script.is_empty())
    }

    /// Returns true when at least one artifact matches the given outcome.
    #[must_use]
    pub fn has_artifacts_for(&self, success: bool) -> bool {
        self.artifacts.iter().any(|a| a.when.should_upload(success))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_when_matching() {
        assert!(ArtifactWhen::Always.should_upload(true));
        assert!(ArtifactWhen::Always.should_upload(false));
        assert!(ArtifactWhen::OnSuccess.should_upload(true));
        assert!(!ArtifactWhen::OnSuccess.should_upload(false));
        assert!(ArtifactWhen::OnFailure.should_upload(false));
        assert!(!ArtifactWhen::OnFailure.should_upload(true));
    }

    #[test]
    fn test_user_steps_exclude_after_script() {
        let job = JobResponse {
            id: 1,
            steps: vec![
                Step::new(STEP_NAME_SCRIPT, vec!["make".into()]),
                Step::new(STEP_NAME_RELEASE, vec!["make release".into()]),
                Step {
                    name: STEP_NAME_AFTER_SCRIPT.into(),
                    script: vec!["echo done".into()],
                    when: StepWhen::Always,
                    allow_failure: true,
                },
            ],
            ..JobResponse::default()
        };

        let names: Vec<&str> = job.user_steps().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["script", "release"]);
        assert!(job.has_after_script());
    }

    #[test]
    fn test_after_script_requires_content() {
        let job = JobResponse {
            id: 1,
            steps: vec![Step::new(STEP_NAME_AFTER_SCRIPT, vec![])],
            ..JobResponse::default()
        };
        assert!(!job.has_after_script());
    }

    #[test]
    fn test_deserialize_coordinator_payload() {
        let payload = r#"{
            "id": 42,
            "job_info": {"project_id": 1234567890, "project_name": "boilerplate"},
            "git_info": {"repo_url": "https://example.com/ns/repo.git"},
            "image": {"name": "alpine:3.11"},
            "variables": [
                {"key": "CI_JOB_TOKEN", "value": "1234567", "masked": true}
            ],
            "steps": [
                {"name": "script", "script": ["make"], "when": "on_success"}
            ],
            "artifacts": [
                {"name": "binaries", "paths": ["target/*"], "when": "always"}
            ],
            "runner_info": {"timeout": 3600}
        }"#;

        let job: JobResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(job.id, 42);
        assert_eq!(job.image.name, "alpine:3.11");
        assert_eq!(job.artifacts[0].when, ArtifactWhen::Always);
        assert_eq!(job.runner_info.timeout, 3600);
        assert!(job.variables[0].masked);
    }
}
