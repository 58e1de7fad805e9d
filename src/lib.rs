//! # Buildflow
//!
//! The build orchestration core of a distributed CI job runner.
//!
//! Buildflow receives an opaque job description from a coordinator and
//! drives it through a deterministic sequence of execution stages against a
//! pluggable execution backend, with support for:
//!
//! - **Staged execution**: a fixed prologue, user script stages and an
//!   outcome-dependent epilogue
//! - **Bounded retries**: per-stage attempt counts and an executor
//!   preparation retry policy
//! - **Unified cancellation**: deadline, user cancel, process signals and
//!   terminal disconnects multiplexed into one token with a classified cause
//! - **Lifecycle guarantees**: exactly one `cleanup`/`finish` pair per
//!   retained executor, on every exit path
//! - **Terminal sessions**: an optional interactive session gate keeping the
//!   job alive after its script
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use buildflow::prelude::*;
//!
//! let registry = Arc::new(Registry::new());
//! registry.register_executor_provider("docker", provider)?;
//! registry.register_shell(bash)?;
//!
//! let build = Arc::new(BuildContext::new(job, &runner_config));
//! let config = SystemConfig::new(registry);
//! build.run(&config, trace).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod context;
pub mod errors;
pub mod executor;
pub mod features;
pub mod pipeline;
pub mod plan;
pub mod retry;
pub mod shell;
pub mod terminal;
pub mod testing;
pub mod trace;
pub mod variables;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{
        CancelSource, CancelToken, CancellationCause, CancellationHub, Signal,
    };
    pub use crate::context::{
        BuildContext, BuildDirs, JobResponse, RunnerConfig, SystemConfig,
    };
    pub use crate::errors::{BuildError, FailureReason, RunnerError};
    pub use crate::executor::{
        Executor, ExecutorCommand, ExecutorPrepareOptions, ExecutorProvider, FeaturesInfo,
        Registry, ShellScriptInfo,
    };
    pub use crate::pipeline::BuildState;
    pub use crate::plan::{BuildStage, StagePlan};
    pub use crate::retry::RetryPolicy;
    pub use crate::shell::{ScriptGenerator, ScriptOutcome};
    pub use crate::terminal::InteractiveSession;
    pub use crate::trace::{JobTrace, Trace};
    pub use crate::variables::{JobVariable, VariableSet};
}
