use anyhow::{Context, Result};

use conveyor_engine::config::parser;
use conveyor_engine::{record_failure, run_job, JobOutcome, RuntimeConfig};
use conveyor_types::spec::JobSpec;

use crate::RunArgs;

/// Execute the `run` command: decode the spec, build the runtime config, run
/// the job, and return the process exit code.
///
/// A spec that does not decode exits 1 before any storage access. Once the
/// spec decodes, every failure (including an unusable runtime config) is
/// recorded in the job's metadata and only surfaces here as the exit code.
pub async fn execute(args: RunArgs) -> Result<u8> {
    let spec = match JobSpec::from_base64(args.spec.trim()) {
        Ok(spec) => spec,
        Err(e) => {
            tracing::error!(error = %e, "Rejected job spec");
            return Ok(1);
        }
    };

    let config = match runtime_config(&args) {
        Ok(config) => config,
        Err(e) => {
            let message = format!("{e:#}");
            tracing::error!(job = spec.name(), error = %message, "Rejected runtime config");
            let outcome = record_failure(&spec, message).await;
            report_unpersisted(&spec, &outcome);
            return Ok(outcome.exit_code());
        }
    };

    tracing::info!(
        job = spec.name(),
        kind = %spec.kind(),
        metadata_path = spec.metadata_path(),
        "Job spec decoded"
    );

    let outcome = run_job(&spec, &config).await;
    if let Some(error) = &outcome.result.error {
        tracing::error!(job = spec.name(), error = %error, "Job failed");
    }
    report_unpersisted(&spec, &outcome);
    Ok(outcome.exit_code())
}

fn report_unpersisted(spec: &JobSpec, outcome: &JobOutcome) {
    if !outcome.metadata_written {
        tracing::error!(
            metadata_path = spec.metadata_path(),
            "Job metadata was not persisted"
        );
    }
}

/// Defaults, then the optional YAML file, then command-line overrides.
fn runtime_config(args: &RunArgs) -> Result<RuntimeConfig> {
    let mut config = match &args.config {
        Some(path) => parser::parse_runtime_config(path)?,
        None => RuntimeConfig::default(),
    };

    if let Some(secs) = args.function_timeout_secs {
        config.function_timeout_secs = Some(secs);
    }
    if let Some(dir) = &args.scratch_dir {
        config.scratch_dir = Some(dir.clone());
    }
    config.allowed_env_vars.extend(args.allow_env.iter().cloned());

    config.validate().context("Invalid runtime config")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(config: Option<std::path::PathBuf>) -> RunArgs {
        RunArgs {
            spec: String::new(),
            config,
            function_timeout_secs: None,
            allow_env: vec![],
            scratch_dir: None,
        }
    }

    #[test]
    fn defaults_without_file() {
        let config = runtime_config(&args(None)).unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.yaml");
        std::fs::write(
            &path,
            "function_timeout_secs: 30\nallowed_env_vars: [PATH]\nexecutor_command: [/opt/conveyor]\n",
        )
        .unwrap();

        let mut run = args(Some(path));
        run.function_timeout_secs = Some(5);
        run.allow_env = vec!["MODEL_DIR".into()];
        let config = runtime_config(&run).unwrap();

        assert_eq!(config.function_timeout_secs, Some(5));
        assert_eq!(config.allowed_env_vars, vec!["PATH", "MODEL_DIR"]);
        assert_eq!(config.executor_command, vec!["/opt/conveyor"]);
    }

    #[test]
    fn invalid_override_is_rejected() {
        let mut run = args(None);
        run.function_timeout_secs = Some(0);
        assert!(runtime_config(&run).is_err());
    }

    #[test]
    fn missing_file_names_path() {
        let err = runtime_config(&args(Some("/nonexistent/runtime.yaml".into()))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/runtime.yaml"));
    }

    #[tokio::test]
    async fn malformed_spec_exits_one() {
        let mut run = args(None);
        run.spec = "not base64!".into();
        let code = execute(run).await.unwrap();
        assert_eq!(code, 1);
    }

    #[tokio::test]
    async fn bad_config_is_recorded_in_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let spec = JobSpec::from_json(&format!(
            r#"{{"type": "param", "name": "threshold",
                "storage_config": {{"file_config": {{"directory": {:?}}}}},
                "metadata_path": "p/op_meta", "val": "0.5",
                "output_content_path": "p/content", "output_metadata_path": "p/meta"}}"#,
            dir.path().display().to_string()
        ))
        .unwrap();

        let mut run = args(Some(dir.path().join("missing.yaml")));
        run.spec = spec.to_base64().unwrap();
        let code = execute(run).await.unwrap();

        assert_eq!(code, 1);
        let stored: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("p/op_meta")).unwrap())
                .unwrap();
        assert!(stored["error"].as_str().unwrap().contains("missing.yaml"));
        assert!(!dir.path().join("p/content").exists());
    }
}
