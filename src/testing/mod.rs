//! Test doubles and fixtures for the executor, shell, trace and session
//! contracts.
//!
//! These are used by the crate's own tests and exported for consumers
//! writing tests against the orchestration core.

mod fixtures;
mod mocks;

pub use fixtures::{
    multistep_job, runner_config, successful_job, test_registry, test_system_config, TEST_SHELL,
};
pub use mocks::{
    MockExecutor, MockExecutorControl, MockExecutorProvider, MockScriptGenerator, MockSession,
    RecordingTrace,
};
