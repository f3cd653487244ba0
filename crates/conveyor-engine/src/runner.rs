//! Job runner: dispatch one spec, write its outputs, record the outcome.
//!
//! Every job ends by writing an [`OperatorResult`] to its
//! `metadata_path`, success or failure. A metadata write failure is
//! logged and reported in [`JobOutcome::metadata_written`] but never
//! changes the exit code.

use std::collections::BTreeMap;
use std::time::Instant;

use conveyor_storage::Storage;
use conveyor_types::artifact::{ArtifactType, CheckSeverity};
use conveyor_types::result::OperatorResult;
use conveyor_types::spec::{
    AuthenticateSpec, CompileAirflowSpec, DiscoverSpec, ExtractSpec, FunctionSpec, JobSpec,
    LoadSpec, ParamSpec,
};
use tracing::Instrument;

use crate::artifacts::{read_artifact, read_artifacts, write_artifact, ArtifactDest, ArtifactRef};
use crate::codec::{Artifact, CheckResult, ParameterValue};
use crate::config::RuntimeConfig;
use crate::connector::{resolve_name, setup_connector, TabularConnector};
use crate::dag;
use crate::errors::JobError;
use crate::function::{self, FunctionCall};

/// Final state of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub result: OperatorResult,
    /// Whether the result record reached `metadata_path`.
    pub metadata_written: bool,
}

impl JobOutcome {
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        self.result.exit_code()
    }
}

struct JobContext<'a> {
    storage: &'a dyn Storage,
    config: &'a RuntimeConfig,
    logs: BTreeMap<String, String>,
}

impl JobContext<'_> {
    fn log(&mut self, stage: &str, text: impl Into<String>) {
        self.logs.insert(stage.to_string(), text.into());
    }
}

/// Run `spec` against the storage backend its `storage_config` selects.
///
/// When the backend cannot be opened there is nowhere to write the
/// result record; the failure is logged and the outcome reports
/// `metadata_written == false`.
pub async fn run_job(spec: &JobSpec, config: &RuntimeConfig) -> JobOutcome {
    match conveyor_storage::open(spec.storage_config()) {
        Ok(storage) => run_job_with_storage(spec, storage.as_ref(), config).await,
        Err(e) => {
            let err = JobError::from(e);
            tracing::error!(job = spec.name(), error = %err, "Cannot open storage");
            JobOutcome {
                result: OperatorResult::failure(err.to_string(), BTreeMap::new()),
                metadata_written: false,
            }
        }
    }
}

/// Record `error` as the outcome of `spec` without running it.
///
/// For jobs that cannot start, such as when the runtime config is invalid.
/// The result record still reaches `metadata_path` when storage opens.
pub async fn record_failure(spec: &JobSpec, error: impl Into<String>) -> JobOutcome {
    let result = OperatorResult::failure(error, BTreeMap::new());
    let metadata_written = match conveyor_storage::open(spec.storage_config()) {
        Ok(storage) => write_metadata(storage.as_ref(), spec.metadata_path(), &result).await,
        Err(e) => {
            tracing::error!(job = spec.name(), error = %JobError::from(e), "Cannot open storage");
            false
        }
    };
    JobOutcome {
        result,
        metadata_written,
    }
}

/// Run `spec` against an explicit storage backend.
pub async fn run_job_with_storage(
    spec: &JobSpec,
    storage: &dyn Storage,
    config: &RuntimeConfig,
) -> JobOutcome {
    let span = tracing::info_span!("job", kind = %spec.kind(), name = spec.name());
    async {
        let started = Instant::now();
        let mut ctx = JobContext {
            storage,
            config,
            logs: BTreeMap::new(),
        };
        ctx.log(
            "runtime",
            format!("conveyor-engine {}", env!("CARGO_PKG_VERSION")),
        );

        let result = match dispatch(spec, &mut ctx).await {
            Ok(()) => {
                tracing::info!(
                    elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Job succeeded"
                );
                OperatorResult::success(ctx.logs)
            }
            Err(err) => {
                tracing::error!(error = %err, retryable = err.is_retryable(), "Job failed");
                let mut logs = ctx.logs;
                if let Some(connector_err) = err.as_connector_error() {
                    if let Ok(details) = serde_json::to_string(connector_err) {
                        logs.insert("connector_error".to_string(), details);
                    }
                }
                OperatorResult::failure(err.to_string(), logs)
            }
        };

        let metadata_written = write_metadata(storage, spec.metadata_path(), &result).await;
        JobOutcome {
            result,
            metadata_written,
        }
    }
    .instrument(span)
    .await
}

async fn write_metadata(storage: &dyn Storage, path: &str, result: &OperatorResult) -> bool {
    let body = match serde_json::to_vec(result) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "Cannot serialize job metadata");
            return false;
        }
    };
    match storage.put(path, body).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(path, error = %e, "Failed to write job metadata");
            false
        }
    }
}

async fn dispatch(spec: &JobSpec, ctx: &mut JobContext<'_>) -> Result<(), JobError> {
    match spec {
        JobSpec::Authenticate(s) => authenticate(s, ctx).await,
        JobSpec::Extract(s) => extract(s, ctx).await,
        JobSpec::Load(s) => load(s, ctx).await,
        JobSpec::Discover(s) => discover(s, ctx).await,
        JobSpec::Function(s) => run_function(s, ctx).await,
        JobSpec::Param(s) => materialize_param(s, ctx).await,
        JobSpec::CompileAirflow(s) => compile_airflow(s, ctx).await,
    }
}

fn connector_for(
    name: &str,
    config: &serde_json::Value,
) -> Result<Box<dyn TabularConnector>, JobError> {
    let name = resolve_name(name)?;
    Ok(setup_connector(name, config)?)
}

async fn authenticate(spec: &AuthenticateSpec, ctx: &mut JobContext<'_>) -> Result<(), JobError> {
    let mut connector = connector_for(&spec.connector_name, &spec.connector_config)?;
    connector.authenticate().await?;
    ctx.log("authenticate", format!("authenticated against {}", spec.connector_name));
    Ok(())
}

async fn extract(spec: &ExtractSpec, ctx: &mut JobContext<'_>) -> Result<(), JobError> {
    let mut connector = connector_for(&spec.connector_name, &spec.connector_config)?;
    let table = connector.extract(&spec.parameters).await?;
    let rows = table.num_rows();
    let columns = table.schema().fields().len();
    write_artifact(
        ctx.storage,
        ArtifactDest {
            content_path: &spec.output_content_path,
            metadata_path: &spec.output_metadata_path,
        },
        &Artifact::Table(table),
    )
    .await?;
    ctx.log(
        "extract",
        format!("extracted {rows} rows x {columns} columns from {}", spec.connector_name),
    );
    Ok(())
}

async fn load(spec: &LoadSpec, ctx: &mut JobContext<'_>) -> Result<(), JobError> {
    let found = spec.input_content_paths.len();
    if found != 1 || spec.input_metadata_paths.len() != 1 {
        return Err(JobError::InputArityMismatch { expected: 1, found });
    }
    let mut connector = connector_for(&spec.connector_name, &spec.connector_config)?;

    let artifact = read_artifact(
        ctx.storage,
        ArtifactRef {
            content_path: &spec.input_content_paths[0],
            metadata_path: &spec.input_metadata_paths[0],
            expected: ArtifactType::Table,
        },
    )
    .await?;
    let Artifact::Table(table) = artifact else {
        return Err(JobError::type_mismatch(
            "load input",
            ArtifactType::Table,
            artifact.artifact_type(),
        ));
    };

    connector.load(&spec.parameters, &table).await?;
    ctx.log(
        "load",
        format!("loaded {} rows into {}", table.num_rows(), spec.connector_name),
    );
    Ok(())
}

async fn discover(spec: &DiscoverSpec, ctx: &mut JobContext<'_>) -> Result<(), JobError> {
    let mut connector = connector_for(&spec.connector_name, &spec.connector_config)?;
    let tables = connector.discover().await?;
    let body = serde_json::to_vec(&tables)
        .map_err(|e| JobError::Internal(format!("cannot serialize table list: {e}")))?;
    ctx.storage.put(&spec.output_content_path, body).await?;
    ctx.log("discover", format!("found {} tables", tables.len()));
    Ok(())
}

async fn run_function(spec: &FunctionSpec, ctx: &mut JobContext<'_>) -> Result<(), JobError> {
    for (idx, kind) in spec.input_artifact_types.iter().enumerate() {
        if !kind.is_function_input() {
            return Err(JobError::type_mismatch(
                format!("function input {idx}"),
                "table, metric or parameter",
                kind,
            ));
        }
    }

    let archive = ctx.storage.get(&spec.function_path).await?;
    let references: Vec<ArtifactRef<'_>> = spec
        .input_content_paths
        .iter()
        .zip(&spec.input_metadata_paths)
        .zip(&spec.input_artifact_types)
        .map(|((content, metadata), kind)| ArtifactRef {
            content_path: content,
            metadata_path: metadata,
            expected: *kind,
        })
        .collect();
    let inputs = read_artifacts(ctx.storage, &references).await?;

    let run = function::execute(
        FunctionCall {
            archive: &archive,
            inputs: &inputs,
            output_type: spec.output_artifact_type,
            check_severity: spec.check_severity,
        },
        ctx.config,
    )
    .await?;
    ctx.logs.extend(run.logs);

    write_artifact(
        ctx.storage,
        ArtifactDest {
            content_path: &spec.output_content_path,
            metadata_path: &spec.output_metadata_path,
        },
        &run.output,
    )
    .await?;

    if let Artifact::Check(CheckResult {
        passed: false,
        severity,
    }) = run.output
    {
        if severity == CheckSeverity::Error {
            return Err(JobError::CheckFailed(spec.name.clone()));
        }
        tracing::warn!(check = %spec.name, "Warning-level check did not pass");
        ctx.log("check", "warning-level check did not pass");
    }
    Ok(())
}

async fn materialize_param(spec: &ParamSpec, ctx: &mut JobContext<'_>) -> Result<(), JobError> {
    let value = Artifact::Parameter(ParameterValue {
        value: spec.val.clone(),
        val_type: spec.val_type.clone(),
    });
    write_artifact(
        ctx.storage,
        ArtifactDest {
            content_path: &spec.output_content_path,
            metadata_path: &spec.output_metadata_path,
        },
        &value,
    )
    .await
}

async fn compile_airflow(
    spec: &CompileAirflowSpec,
    ctx: &mut JobContext<'_>,
) -> Result<(), JobError> {
    let rendered = dag::render_airflow_dag(spec, &ctx.config.executor_command)?;
    ctx.storage
        .put(&spec.output_content_path, rendered.into_bytes())
        .await?;
    ctx.log(
        "compile",
        format!("compiled {} tasks as DAG '{}'", spec.specs.len(), dag::dag_id(spec)),
    );
    Ok(())
}
