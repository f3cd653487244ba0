//! Runtime config YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use super::RuntimeConfig;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| {
            missing.push(caps[1].to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }
    Ok(result.into_owned())
}

/// Parse a runtime config YAML string (after env var substitution).
///
/// Missing keys take their defaults; the result is validated.
///
/// # Errors
///
/// Returns an error if substitution fails, the YAML is invalid, or the
/// config does not validate.
pub fn parse_runtime_config_str(yaml_str: &str) -> Result<RuntimeConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: RuntimeConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse runtime config YAML")?;
    config.validate()?;
    Ok(config)
}

/// Parse a runtime config YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not parse.
pub fn parse_runtime_config(path: &Path) -> Result<RuntimeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read runtime config: {}", path.display()))?;
    parse_runtime_config_str(&content)
        .with_context(|| format!("Invalid runtime config: {}", path.display()))
}
