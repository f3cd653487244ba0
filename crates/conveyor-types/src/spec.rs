//! Job specifications.
//!
//! A spec arrives as base64-encoded JSON, internally tagged on `type`.
//! [`JobSpec::from_base64`] and [`JobSpec::from_json`] decode it and
//! check the structural invariants that need no I/O, so a malformed spec
//! fails before any storage or network access.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::{ArtifactType, CheckSeverity};
use crate::storage::StorageConfig;

/// Spec decode or validation failure.
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("spec is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("spec is not a valid job description: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid spec: {0}")]
    Invalid(String),
}

/// Job kind discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Authenticate,
    Extract,
    Load,
    Discover,
    Function,
    Param,
    CompileAirflow,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Authenticate => "authenticate",
            Self::Extract => "extract",
            Self::Load => "load",
            Self::Discover => "discover",
            Self::Function => "function",
            Self::Param => "param",
            Self::CompileAirflow => "compile_airflow",
        };
        f.write_str(s)
    }
}

/// Validate credentials against a connector; no artifact I/O.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticateSpec {
    pub name: String,
    pub storage_config: StorageConfig,
    pub metadata_path: String,
    pub connector_name: String,
    #[serde(default)]
    pub connector_config: serde_json::Value,
}

/// Pull one table out of a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractSpec {
    pub name: String,
    pub storage_config: StorageConfig,
    pub metadata_path: String,
    pub connector_name: String,
    #[serde(default)]
    pub connector_config: serde_json::Value,
    /// Connector-specific extract parameters (query, object path, ...).
    pub parameters: serde_json::Value,
    pub output_content_path: String,
    pub output_metadata_path: String,
}

/// Push one table artifact into a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSpec {
    pub name: String,
    pub storage_config: StorageConfig,
    pub metadata_path: String,
    pub connector_name: String,
    #[serde(default)]
    pub connector_config: serde_json::Value,
    pub parameters: serde_json::Value,
    pub input_content_paths: Vec<String>,
    pub input_metadata_paths: Vec<String>,
}

/// List the tables a connector exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverSpec {
    pub name: String,
    pub storage_config: StorageConfig,
    pub metadata_path: String,
    pub connector_name: String,
    #[serde(default)]
    pub connector_config: serde_json::Value,
    pub output_content_path: String,
}

/// Run a packaged user function over typed inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub storage_config: StorageConfig,
    pub metadata_path: String,
    /// Storage path of the packaged function archive.
    pub function_path: String,
    pub input_content_paths: Vec<String>,
    pub input_metadata_paths: Vec<String>,
    pub input_artifact_types: Vec<ArtifactType>,
    pub output_content_path: String,
    pub output_metadata_path: String,
    pub output_artifact_type: ArtifactType,
    /// Only meaningful when the output is a check.
    #[serde(default)]
    pub check_severity: CheckSeverity,
}

/// Materialize a literal parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub storage_config: StorageConfig,
    pub metadata_path: String,
    /// Serialized value.
    pub val: String,
    #[serde(default = "default_val_type")]
    pub val_type: String,
    pub output_content_path: String,
    pub output_metadata_path: String,
}

fn default_val_type() -> String {
    "json".to_string()
}

/// Dependency between two tasks of a compiled workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagEdge {
    pub from: String,
    pub to: String,
}

/// Render a workflow as an Airflow DAG file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileAirflowSpec {
    pub name: String,
    pub storage_config: StorageConfig,
    pub metadata_path: String,
    pub output_content_path: String,
    pub workflow_id: Uuid,
    pub workflow_name: String,
    /// Task id → spec of the job that task runs.
    pub specs: BTreeMap<String, JobSpec>,
    #[serde(default)]
    pub edges: Vec<DagEdge>,
}

/// One unit of work handed to a job process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobSpec {
    Authenticate(AuthenticateSpec),
    Extract(ExtractSpec),
    Load(LoadSpec),
    Discover(DiscoverSpec),
    Function(FunctionSpec),
    Param(ParamSpec),
    CompileAirflow(CompileAirflowSpec),
}

impl JobSpec {
    /// Decode a base64 (standard alphabet) JSON spec.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] on bad base64, bad JSON, or a spec that
    /// violates a structural invariant.
    pub fn from_base64(encoded: &str) -> Result<Self, SpecError> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
        let spec: Self = serde_json::from_slice(&bytes)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Decode a JSON spec.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] on bad JSON or a structural invariant
    /// violation.
    pub fn from_json(json: &str) -> Result<Self, SpecError> {
        let spec: Self = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Encode as base64 JSON, the form `conveyor run --spec` accepts.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Json`] if serialization fails.
    pub fn to_base64(&self) -> Result<String, SpecError> {
        let json = serde_json::to_vec(self)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }

    #[must_use]
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Authenticate(_) => JobKind::Authenticate,
            Self::Extract(_) => JobKind::Extract,
            Self::Load(_) => JobKind::Load,
            Self::Discover(_) => JobKind::Discover,
            Self::Function(_) => JobKind::Function,
            Self::Param(_) => JobKind::Param,
            Self::CompileAirflow(_) => JobKind::CompileAirflow,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Authenticate(s) => &s.name,
            Self::Extract(s) => &s.name,
            Self::Load(s) => &s.name,
            Self::Discover(s) => &s.name,
            Self::Function(s) => &s.name,
            Self::Param(s) => &s.name,
            Self::CompileAirflow(s) => &s.name,
        }
    }

    #[must_use]
    pub fn storage_config(&self) -> &StorageConfig {
        match self {
            Self::Authenticate(s) => &s.storage_config,
            Self::Extract(s) => &s.storage_config,
            Self::Load(s) => &s.storage_config,
            Self::Discover(s) => &s.storage_config,
            Self::Function(s) => &s.storage_config,
            Self::Param(s) => &s.storage_config,
            Self::CompileAirflow(s) => &s.storage_config,
        }
    }

    #[must_use]
    pub fn metadata_path(&self) -> &str {
        match self {
            Self::Authenticate(s) => &s.metadata_path,
            Self::Extract(s) => &s.metadata_path,
            Self::Load(s) => &s.metadata_path,
            Self::Discover(s) => &s.metadata_path,
            Self::Function(s) => &s.metadata_path,
            Self::Param(s) => &s.metadata_path,
            Self::CompileAirflow(s) => &s.metadata_path,
        }
    }

    /// Check invariants that serde cannot express.
    ///
    /// Input arity of load jobs is deliberately not checked here: it is
    /// a runtime failure that still produces a metadata record.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::Invalid`] listing every violation found.
    pub fn validate(&self) -> Result<(), SpecError> {
        let mut errors = Vec::new();
        self.collect_errors("", &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SpecError::Invalid(errors.join("; ")))
        }
    }

    fn collect_errors(&self, prefix: &str, errors: &mut Vec<String>) {
        if self.metadata_path().trim().is_empty() {
            errors.push(format!("{prefix}metadata_path must not be empty"));
        }
        match self {
            Self::Load(s) => {
                if s.input_content_paths.len() != s.input_metadata_paths.len() {
                    errors.push(format!(
                        "{prefix}load has {} input content paths but {} metadata paths",
                        s.input_content_paths.len(),
                        s.input_metadata_paths.len()
                    ));
                }
            }
            Self::Function(s) => {
                let n = s.input_content_paths.len();
                if s.input_metadata_paths.len() != n || s.input_artifact_types.len() != n {
                    errors.push(format!(
                        "{prefix}function inputs disagree: {} content paths, {} metadata paths, {} types",
                        n,
                        s.input_metadata_paths.len(),
                        s.input_artifact_types.len()
                    ));
                }
                if s.output_artifact_type == ArtifactType::Parameter {
                    errors.push(format!(
                        "{prefix}function output type must be table, float or boolean"
                    ));
                }
            }
            Self::CompileAirflow(s) => {
                if s.workflow_name.trim().is_empty() {
                    errors.push(format!("{prefix}workflow_name must not be empty"));
                }
                for (task_id, task) in &s.specs {
                    task.collect_errors(&format!("{prefix}task '{task_id}': "), errors);
                }
            }
            Self::Authenticate(_) | Self::Extract(_) | Self::Discover(_) | Self::Param(_) => {}
        }
    }
}
