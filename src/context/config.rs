//! Runner and host configuration.
//!
//! [`RunnerConfig`] travels with the job and is deep-copied at the build
//! boundary; the caller's value is never mutated. [`SystemConfig`] carries
//! the host-owned knobs for a single `run` invocation, including the
//! executor/shell registry.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::executor::Registry;

/// Per-runner settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Name of the executor to create for this build.
    #[serde(default)]
    pub executor: String,
    /// Optional base URL overriding the job's repo URL.
    #[serde(default)]
    pub clone_url: Option<String>,
    /// Disables `CI_DEBUG_TRACE` regardless of job variables.
    #[serde(default)]
    pub debug_trace_disabled: bool,
    /// `KEY=VALUE` environment overrides; these win over job variables for
    /// feature flags.
    #[serde(default)]
    pub environment: Vec<String>,
}

impl RunnerSettings {
    /// Looks up `key` among the environment overrides; the last entry wins.
    #[must_use]
    pub fn environment_value(&self, key: &str) -> Option<&str> {
        self.environment.iter().rev().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

/// Credentials identifying the runner against the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerCredentials {
    /// Runner token; its first eight characters form the short token used in
    /// directory layouts and unique names.
    #[serde(default)]
    pub token: String,
}

impl RunnerCredentials {
    /// Returns the short form of the token.
    #[must_use]
    pub fn short_token(&self) -> String {
        self.token.chars().take(8).collect()
    }
}

/// The full runner configuration attached to a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Behavioural settings.
    #[serde(default)]
    pub settings: RunnerSettings,
    /// Coordinator credentials.
    #[serde(default)]
    pub credentials: RunnerCredentials,
}

/// Host-owned configuration for one `run` invocation.
///
/// The registry is an explicit value rather than process-global state so
/// tests can inject their own.
#[derive(Clone)]
pub struct SystemConfig {
    /// Executor provider and shell registry.
    pub registry: Arc<Registry>,
    /// Extra prepare attempts after the first one.
    pub preparation_retries: u32,
    /// Delay between prepare attempts. Tests set this to zero.
    pub preparation_retry_interval: Duration,
    /// Hard ceiling on build execution time, combined with the job timeout.
    pub max_build_time: Option<Duration>,
    /// Budget for the failure epilogue once the build was cancelled.
    pub epilogue_grace: Duration,
    /// How long an attached terminal session may outlive the build script.
    pub terminal_wait_timeout: Duration,
}

impl SystemConfig {
    /// Creates a config with production defaults around `registry`.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            preparation_retries: 2,
            preparation_retry_interval: Duration::from_secs(3),
            max_build_time: None,
            epilogue_grace: Duration::from_secs(300),
            terminal_wait_timeout: Duration::from_secs(1800),
        }
    }

    /// Sets the delay between prepare attempts.
    #[must_use]
    pub fn with_preparation_retry_interval(mut self, interval: Duration) -> Self {
        self.preparation_retry_interval = interval;
        self
    }

    /// Sets the execution ceiling.
    #[must_use]
    pub fn with_max_build_time(mut self, ceiling: Duration) -> Self {
        self.max_build_time = Some(ceiling);
        self
    }

    /// Sets the terminal wait timeout.
    #[must_use]
    pub fn with_terminal_wait_timeout(mut self, timeout: Duration) -> Self {
        self.terminal_wait_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for SystemConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemConfig")
            .field("preparation_retries", &self.preparation_retries)
            .field(
                "preparation_retry_interval",
                &self.preparation_retry_interval,
            )
            .field("max_build_time", &self.max_build_time)
            .field("epilogue_grace", &self.epilogue_grace)
            .field("terminal_wait_timeout", &self.terminal_wait_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_value_last_wins() {
        let settings = RunnerSettings {
            environment: vec![
                "FF_X=false".to_string(),
                "OTHER=1".to_string(),
                "FF_X=true".to_string(),
            ],
            ..RunnerSettings::default()
        };
        assert_eq!(settings.environment_value("FF_X"), Some("true"));
        assert_eq!(settings.environment_value("MISSING"), None);
    }

    #[test]
    fn test_short_token() {
        let credentials = RunnerCredentials {
            token: "Ze_n8E6en622WxxSg4r8".to_string(),
        };
        assert_eq!(credentials.short_token(), "Ze_n8E6e");

        let short = RunnerCredentials {
            token: "1234".to_string(),
        };
        assert_eq!(short.short_token(), "1234");
    }

    #[test]
    fn test_config_deep_copy_is_independent() {
        let original = RunnerConfig {
            settings: RunnerSettings {
                executor: "docker".to_string(),
                ..RunnerSettings::default()
            },
            credentials: RunnerCredentials {
                token: "abc".to_string(),
            },
        };

        let mut copy = original.clone();
        copy.settings.executor = "shell".to_string();
        copy.credentials.token = "mutated".to_string();

        assert_eq!(original.settings.executor, "docker");
        assert_eq!(original.credentials.token, "abc");
    }
}
