//! Build context: the job response, runner configuration and derived state.
//!
//! This module provides:
//! - The immutable coordinator payload ([`JobResponse`])
//! - The defensively copied runner configuration ([`RunnerConfig`])
//! - The per-job [`BuildContext`] with directory and variable derivation

mod build;
mod config;
mod job;

pub use build::{BuildContext, BuildDirs, DEFAULT_BUILD_TIMEOUT};
pub use config::{RunnerConfig, RunnerCredentials, RunnerSettings, SystemConfig};
pub use job::{
    Artifact, ArtifactWhen, GitInfo, Image, JobInfo, JobResponse, RunnerInfo, Step, StepWhen,
    STEP_NAME_AFTER_SCRIPT, STEP_NAME_RELEASE, STEP_NAME_SCRIPT,
};
