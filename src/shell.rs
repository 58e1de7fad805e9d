//! Script generation contract.

use crate::errors::RunnerError;
use crate::executor::ShellScriptInfo;
use crate::plan::BuildStage;

/// Result of generating a script for one stage.
///
/// `NoOp` is a control-flow signal, not an error: the stage has nothing
/// meaningful to do. It still carries the fallback script that is executed
/// when no-op skipping is disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// A script that must be executed.
    Run(String),
    /// The stage would be a no-op; the carried script is used when
    /// `FF_SKIP_NOOP_BUILD_STAGES` is off.
    NoOp(String),
}

impl ScriptOutcome {
    /// Returns the script text regardless of the outcome kind.
    #[must_use]
    pub fn script(&self) -> &str {
        match self {
            Self::Run(script) | Self::NoOp(script) => script,
        }
    }
}

/// Generates stage scripts for a named shell dialect.
pub trait ScriptGenerator: Send + Sync {
    /// Name the generator is registered under.
    fn name(&self) -> &str;

    /// Generates the script for `stage`.
    fn generate_script(
        &self,
        stage: &BuildStage,
        info: &ShellScriptInfo,
    ) -> Result<ScriptOutcome, RunnerError>;
}
