//! Running a packaged user function in a child process.
//!
//! Each invocation gets a fresh temporary directory: the archive is
//! unpacked there, table inputs are written under `inputs/` as Arrow IPC
//! stream files, and `invocation.json` describes the call. The manifest
//! command runs in that directory with a cleared environment plus the
//! configured allow-list, and must leave a [`FunctionOutput`] envelope at
//! the invocation's `output_path`. The directory is removed on every exit
//! path when the [`tempfile::TempDir`] drops.

pub mod sandbox;

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use conveyor_types::artifact::{ArtifactType, CheckSeverity};
use conveyor_types::function::{
    FunctionInvocation, FunctionManifest, FunctionOutput, InvocationInput, INPUTS_DIR,
    INVOCATION_ENV, INVOCATION_FILE, OUTPUT_FILE, RUNTIME_VERSION_FILE,
};
use tokio::process::Command;

use crate::codec::{ipc, Artifact, CheckResult, Table};
use crate::config::RuntimeConfig;
use crate::errors::JobError;
use crate::package::{normalize_relative, unpack_archive};

/// What to call and what it must return.
#[derive(Debug, Clone, Copy)]
pub struct FunctionCall<'a> {
    pub archive: &'a [u8],
    pub inputs: &'a [Artifact],
    pub output_type: ArtifactType,
    /// Severity attached to a check result.
    pub check_severity: CheckSeverity,
}

/// Result of one successful invocation.
#[derive(Debug)]
pub struct FunctionRun {
    pub output: Artifact,
    /// Captured stdout/stderr and runtime details, for the job metadata.
    pub logs: BTreeMap<String, String>,
}

fn execution_error(context: &str, err: impl std::fmt::Display) -> JobError {
    JobError::FunctionExecution(format!("{context}: {err}"))
}

/// Invoke the function in `call.archive` on `call.inputs`.
///
/// # Errors
///
/// - [`JobError::Package`] if the archive is malformed or unsafe
/// - [`JobError::ResultTypeMismatch`] if an input cannot be passed to a
///   function or the output is not of the declared kind
/// - [`JobError::FunctionExecution`] on spawn failure, non-zero exit,
///   timeout, or a missing/garbled output envelope
pub async fn execute(call: FunctionCall<'_>, config: &RuntimeConfig) -> Result<FunctionRun, JobError> {
    let workdir = match &config.scratch_dir {
        Some(dir) => tempfile::Builder::new().prefix("conveyor-fn-").tempdir_in(dir),
        None => tempfile::Builder::new().prefix("conveyor-fn-").tempdir(),
    }
    .map_err(|e| execution_error("failed to create work directory", e))?;
    let root = workdir.path();

    let manifest = unpack_archive(call.archive, root)?;
    let inputs = stage_inputs(root, call.inputs).await?;

    let invocation = FunctionInvocation {
        entry_point: manifest.entry_point.clone(),
        inputs,
        output_path: OUTPUT_FILE.to_string(),
        output_type: call.output_type,
    };
    let invocation_path = root.join(INVOCATION_FILE);
    let body = serde_json::to_vec_pretty(&invocation)
        .map_err(|e| JobError::Internal(format!("cannot serialize invocation: {e}")))?;
    tokio::fs::write(&invocation_path, body)
        .await
        .map_err(|e| execution_error("failed to write invocation", e))?;

    let mut logs = BTreeMap::new();
    logs.insert("function".to_string(), manifest.name.clone());
    if let Ok(version) = tokio::fs::read_to_string(root.join(RUNTIME_VERSION_FILE)).await {
        logs.insert("runtime_version".to_string(), version.trim().to_string());
    }

    spawn_and_wait(&manifest, root, &invocation_path, config, &mut logs).await?;

    let output = read_output(root, call.output_type, call.check_severity).await?;
    tracing::info!(
        function = %manifest.name,
        output = %call.output_type,
        "Function completed"
    );
    Ok(FunctionRun { output, logs })
}

async fn stage_inputs(root: &Path, inputs: &[Artifact]) -> Result<Vec<InvocationInput>, JobError> {
    let dir = root.join(INPUTS_DIR);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| execution_error("failed to create inputs directory", e))?;

    let mut staged = Vec::with_capacity(inputs.len());
    for (idx, input) in inputs.iter().enumerate() {
        let entry = match input {
            Artifact::Table(table) => {
                let relative = format!("{INPUTS_DIR}/input_{idx}.arrow");
                let mut buf = Vec::new();
                ipc::write_stream(&mut buf, table.schema(), table.batches())?;
                tokio::fs::write(root.join(&relative), buf)
                    .await
                    .map_err(|e| execution_error("failed to stage table input", e))?;
                InvocationInput::Table { path: relative }
            }
            Artifact::Metric(value) => InvocationInput::Metric { value: *value },
            Artifact::Parameter(param) => InvocationInput::Parameter {
                value: param.value.clone(),
                val_type: param.val_type.clone(),
            },
            Artifact::Check(_) => {
                return Err(JobError::type_mismatch(
                    format!("function input {idx}"),
                    "table, metric or parameter",
                    ArtifactType::Check,
                ))
            }
        };
        staged.push(entry);
    }
    Ok(staged)
}

async fn spawn_and_wait(
    manifest: &FunctionManifest,
    root: &Path,
    invocation_path: &Path,
    config: &RuntimeConfig,
    logs: &mut BTreeMap<String, String>,
) -> Result<(), JobError> {
    let Some((program, args)) = manifest.command.split_first() else {
        return Err(JobError::FunctionExecution(
            "function manifest has an empty command".to_string(),
        ));
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(root)
        .env_clear()
        .envs(sandbox::inherited_env(&config.allowed_env_vars))
        .env(INVOCATION_ENV, invocation_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command
        .spawn()
        .map_err(|e| execution_error(&format!("failed to start '{program}'"), e))?;
    tracing::debug!(program = %program, pid = ?child.id(), "Function process started");

    let waited = child.wait_with_output();
    let output = match config.function_timeout() {
        Some(limit) => tokio::time::timeout(limit, waited).await.map_err(|_| {
            JobError::FunctionExecution(format!("timed out after {}s", limit.as_secs()))
        })?,
        None => waited.await,
    }
    .map_err(|e| execution_error("failed to wait for function process", e))?;

    let stdout = sandbox::captured_log(&output.stdout, config.max_log_bytes);
    let stderr = sandbox::captured_log(&output.stderr, config.max_log_bytes);

    if !output.status.success() {
        tracing::warn!(status = %output.status, "Function process failed");
        let detail = stderr.trim();
        return Err(JobError::FunctionExecution(if detail.is_empty() {
            format!("process exited with {}", output.status)
        } else {
            format!("process exited with {}: {detail}", output.status)
        }));
    }

    logs.insert("stdout".to_string(), stdout);
    logs.insert("stderr".to_string(), stderr);
    Ok(())
}

async fn read_output(
    root: &Path,
    declared: ArtifactType,
    severity: CheckSeverity,
) -> Result<Artifact, JobError> {
    let raw = match tokio::fs::read(root.join(OUTPUT_FILE)).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(JobError::FunctionExecution(
                "function exited without writing its output".to_string(),
            ))
        }
        Err(e) => return Err(execution_error("failed to read function output", e)),
    };
    let envelope: FunctionOutput =
        serde_json::from_slice(&raw).map_err(|e| execution_error("malformed function output", e))?;

    if envelope.artifact_type() != declared {
        return Err(JobError::type_mismatch(
            "function output",
            declared,
            envelope.artifact_type(),
        ));
    }

    let artifact = match envelope {
        FunctionOutput::Table { path } => {
            let relative = normalize_relative(&path)?;
            let bytes = tokio::fs::read(root.join(&relative))
                .await
                .map_err(|e| execution_error(&format!("failed to read output table '{relative}'"), e))?;
            let (schema, batches) = ipc::read_stream(&bytes)?;
            Artifact::Table(Table::new(schema, batches)?)
        }
        FunctionOutput::Metric { value } => Artifact::Metric(value),
        FunctionOutput::Check { value } => Artifact::Check(CheckResult {
            passed: value,
            severity,
        }),
    };
    Ok(artifact)
}
