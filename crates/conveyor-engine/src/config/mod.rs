//! Runtime configuration threaded through every job.
//!
//! Built from defaults, an optional YAML file ([`parser`]) and CLI
//! overrides, then passed by reference into the runner. Nothing in the
//! engine reads process-wide flags.

pub mod parser;

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

static ENV_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid env name regex"));

/// Default environment variables a function process may inherit.
pub const DEFAULT_ALLOWED_ENV_VARS: &[&str] = &["PATH", "HOME", "LANG", "TZ"];

/// Knobs that shape how jobs execute on this host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Wall-clock limit for one function invocation; unset means none.
    pub function_timeout_secs: Option<u64>,
    /// Variables copied from this process into a function process.
    pub allowed_env_vars: Vec<String>,
    /// Parent directory for per-invocation work directories.
    pub scratch_dir: Option<PathBuf>,
    /// Program (and leading args) compiled DAG tasks invoke; `run --spec`
    /// is appended.
    pub executor_command: Vec<String>,
    /// Cap on captured stdout/stderr per stream, in bytes.
    pub max_log_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            function_timeout_secs: None,
            allowed_env_vars: DEFAULT_ALLOWED_ENV_VARS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            scratch_dir: None,
            executor_command: vec!["conveyor".to_string()],
            max_log_bytes: 64 * 1024,
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn function_timeout(&self) -> Option<Duration> {
        self.function_timeout_secs.map(Duration::from_secs)
    }

    /// Check the configuration, reporting every problem at once.
    ///
    /// # Errors
    ///
    /// Returns an error listing each invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.function_timeout_secs == Some(0) {
            errors.push("function_timeout_secs must be greater than 0".to_string());
        }
        if self.executor_command.is_empty() || self.executor_command[0].trim().is_empty() {
            errors.push("executor_command must name a program".to_string());
        }
        if self.max_log_bytes == 0 {
            errors.push("max_log_bytes must be greater than 0".to_string());
        }
        for name in &self.allowed_env_vars {
            if !ENV_NAME_RE.is_match(name) {
                errors.push(format!("allowed_env_vars entry '{name}' is not a variable name"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Runtime configuration errors:\n  - {}",
                errors.join("\n  - ")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RuntimeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.function_timeout(), None);
        assert!(config.allowed_env_vars.contains(&"PATH".to_string()));
    }

    #[test]
    fn collects_every_error() {
        let config = RuntimeConfig {
            function_timeout_secs: Some(0),
            allowed_env_vars: vec!["BAD-NAME".into()],
            executor_command: vec![],
            max_log_bytes: 0,
            ..RuntimeConfig::default()
        };
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("function_timeout_secs"), "{msg}");
        assert!(msg.contains("executor_command"), "{msg}");
        assert!(msg.contains("max_log_bytes"), "{msg}");
        assert!(msg.contains("BAD-NAME"), "{msg}");
    }

    #[test]
    fn timeout_converts_to_duration() {
        let config = RuntimeConfig {
            function_timeout_secs: Some(90),
            ..RuntimeConfig::default()
        };
        assert_eq!(config.function_timeout(), Some(Duration::from_secs(90)));
    }
}
