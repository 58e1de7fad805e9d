//! Stage ordering and per-stage retry attempts.
//!
//! A [`StagePlan`] is derived once from the job response: a fixed prologue,
//! the user script stages, and an epilogue picked by the build outcome.
//! Attempt counts are parsed from variables at plan construction so the
//! pipeline never re-parses them inside the loop.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::context::JobResponse;
use crate::errors::RunnerError;
use crate::variables::VariableSet;

/// Variable controlling `get_sources` attempts.
pub const GET_SOURCES_ATTEMPTS: &str = "GET_SOURCES_ATTEMPTS";
/// Variable controlling `restore_cache` attempts.
pub const RESTORE_CACHE_ATTEMPTS: &str = "RESTORE_CACHE_ATTEMPTS";
/// Variable controlling `download_artifacts` attempts.
pub const ARTIFACT_DOWNLOAD_ATTEMPTS: &str = "ARTIFACT_DOWNLOAD_ATTEMPTS";
/// Variable controlling user stage attempts.
pub const EXECUTOR_JOB_SECTION_ATTEMPTS: &str = "EXECUTOR_JOB_SECTION_ATTEMPTS";

/// Inclusive range accepted for any attempts variable.
pub const ATTEMPTS_RANGE: (u32, u32) = (1, 10);

/// A named step of the build pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    /// Executor-specific environment preparation script.
    Prepare,
    /// Fetch and check out the sources.
    GetSources,
    /// Restore the cache.
    RestoreCache,
    /// Download dependency artifacts.
    DownloadArtifacts,
    /// A user script stage named after its step.
    User(String),
    /// The after-script hook.
    AfterScript,
    /// Archive the cache.
    ArchiveCache,
    /// Upload artifacts declared for a successful build.
    UploadOnSuccessArtifacts,
    /// Upload artifacts declared for a failed build.
    UploadOnFailureArtifacts,
}

impl BuildStage {
    /// Returns true for the fixed prologue/epilogue stages.
    #[must_use]
    pub fn is_predefined(&self) -> bool {
        !matches!(self, Self::User(_))
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prepare => write!(f, "prepare_script"),
            Self::GetSources => write!(f, "get_sources"),
            Self::RestoreCache => write!(f, "restore_cache"),
            Self::DownloadArtifacts => write!(f, "download_artifacts"),
            Self::User(name) => write!(f, "step_{name}"),
            Self::AfterScript => write!(f, "after_script"),
            Self::ArchiveCache => write!(f, "archive_cache"),
            Self::UploadOnSuccessArtifacts => write!(f, "upload_artifacts_on_success"),
            Self::UploadOnFailureArtifacts => write!(f, "upload_artifacts_on_failure"),
        }
    }
}

/// Attempts configuration resolved for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptsPolicy {
    /// No variable set; a single attempt.
    Default,
    /// A valid count inside [`ATTEMPTS_RANGE`].
    Fixed(u32),
    /// The variable was set but unparsable or out of range.
    Invalid,
}

impl AttemptsPolicy {
    fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::Default;
        }
        match raw.parse::<u32>() {
            Ok(n) if n >= ATTEMPTS_RANGE.0 && n <= ATTEMPTS_RANGE.1 => Self::Fixed(n),
            _ => Self::Invalid,
        }
    }
}

/// The ordered execution plan of one build.
#[derive(Debug, Clone)]
pub struct StagePlan {
    prologue: Vec<BuildStage>,
    user: Vec<BuildStage>,
    has_after_script: bool,
    has_success_artifacts: bool,
    has_failure_artifacts: bool,
    attempts: HashMap<BuildStage, AttemptsPolicy>,
}

impl StagePlan {
    /// Builds the plan for `job`, resolving attempt counts from `vars`.
    #[must_use]
    pub fn from_job(job: &JobResponse, vars: &VariableSet) -> Self {
        let prologue = vec![
            BuildStage::Prepare,
            BuildStage::GetSources,
            BuildStage::RestoreCache,
            BuildStage::DownloadArtifacts,
        ];
        let user: Vec<BuildStage> = job
            .user_steps()
            .map(|step| BuildStage::User(step.name.clone()))
            .collect();

        let mut attempts = HashMap::new();
        for (stage, variable) in [
            (BuildStage::GetSources, GET_SOURCES_ATTEMPTS),
            (BuildStage::RestoreCache, RESTORE_CACHE_ATTEMPTS),
            (BuildStage::DownloadArtifacts, ARTIFACT_DOWNLOAD_ATTEMPTS),
        ] {
            attempts.insert(stage, AttemptsPolicy::parse(vars.get(variable)));
        }
        let section = AttemptsPolicy::parse(vars.get(EXECUTOR_JOB_SECTION_ATTEMPTS));
        for stage in &user {
            attempts.insert(stage.clone(), section);
        }

        Self {
            prologue,
            user,
            has_after_script: job.has_after_script(),
            has_success_artifacts: job.has_artifacts_for(true),
            has_failure_artifacts: job.has_artifacts_for(false),
            attempts,
        }
    }

    /// The fixed prologue stages.
    #[must_use]
    pub fn prologue(&self) -> &[BuildStage] {
        &self.prologue
    }

    /// The user script stages, in declaration order.
    #[must_use]
    pub fn user_stages(&self) -> &[BuildStage] {
        &self.user
    }

    /// Every stage of the main sequence, prologue first.
    #[must_use]
    pub fn main_stages(&self) -> Vec<BuildStage> {
        self.prologue.iter().chain(self.user.iter()).cloned().collect()
    }

    /// The epilogue stages for the given outcome.
    ///
    /// The after-script only runs when the prologue succeeded: there is
    /// nothing to clean up after when the checkout itself never happened.
    /// Artifact stages are included only when a declared artifact matches
    /// the outcome.
    #[must_use]
    pub fn epilogue(&self, success: bool, prologue_succeeded: bool) -> Vec<BuildStage> {
        let mut stages = Vec::new();
        if self.has_after_script && prologue_succeeded {
            stages.push(BuildStage::AfterScript);
        }
        if success {
            stages.push(BuildStage::ArchiveCache);
            if self.has_success_artifacts {
                stages.push(BuildStage::UploadOnSuccessArtifacts);
            }
        } else if self.has_failure_artifacts {
            stages.push(BuildStage::UploadOnFailureArtifacts);
        }
        stages
    }

    /// Resolved attempt count for `stage`.
    ///
    /// Stages without an attempts variable run once. An out-of-range value
    /// fails the stage immediately.
    pub fn attempts(&self, stage: &BuildStage) -> Result<u32, RunnerError> {
        match self.attempts.get(stage).copied().unwrap_or(AttemptsPolicy::Default) {
            AttemptsPolicy::Default => Ok(1),
            AttemptsPolicy::Fixed(n) => Ok(n),
            AttemptsPolicy::Invalid => Err(RunnerError::InvalidAttempts {
                stage: stage.to_string(),
            }),
        }
    }
}
