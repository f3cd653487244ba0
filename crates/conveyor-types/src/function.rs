//! Function archive layout and the invocation protocol between the
//! executor and a user function process.
//!
//! An archive holds `function.json` ([`FunctionManifest`]), the entry
//! module at the archive root, `requirements.txt`, `runtime_version.txt`
//! and any declared file dependencies under their relative paths.
//!
//! At run time the executor writes `invocation.json`
//! ([`FunctionInvocation`]) into the unpacked directory, launches
//! [`FunctionManifest::command`] there, and reads the
//! [`FunctionOutput`] the function leaves at `output_path`.

use serde::{Deserialize, Serialize};

/// In-archive name of the serialized function manifest.
pub const MANIFEST_FILE: &str = "function.json";
/// In-archive name of the dependency manifest.
pub const REQUIREMENTS_FILE: &str = "requirements.txt";
/// In-archive name of the runtime version marker.
pub const RUNTIME_VERSION_FILE: &str = "runtime_version.txt";
/// Environment variable naming the invocation file for the function process.
pub const INVOCATION_ENV: &str = "CONVEYOR_INVOCATION";
/// File name of the invocation record inside the working directory.
pub const INVOCATION_FILE: &str = "invocation.json";
/// File the function writes its [`FunctionOutput`] to.
pub const OUTPUT_FILE: &str = "output.json";
/// Directory holding staged table inputs.
pub const INPUTS_DIR: &str = "inputs";

/// Callable inside the entry module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    /// Entry module file name, relative to the archive root.
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub method: String,
}

/// Serialized user function stored as `function.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionManifest {
    pub name: String,
    pub entry_point: EntryPoint,
    /// Program and arguments launched in the unpacked archive directory.
    pub command: Vec<String>,
    /// Dependency paths carried in the archive, relative to its root.
    #[serde(default)]
    pub file_dependencies: Vec<String>,
}

/// File names a dependency may not take inside the archive.
#[must_use]
pub fn reserved_names(entry_file: &str) -> [&str; 4] {
    [entry_file, MANIFEST_FILE, REQUIREMENTS_FILE, RUNTIME_VERSION_FILE]
}

/// Whether an archive-relative path collides with a file the executor
/// writes into the working directory at run time.
#[must_use]
pub fn is_executor_path(normalized: &str) -> bool {
    let top = normalized.split('/').next().unwrap_or(normalized);
    normalized == INVOCATION_FILE || normalized == OUTPUT_FILE || top == INPUTS_DIR
}

/// One decoded input handed to the function, in declared order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvocationInput {
    /// Arrow IPC stream file, relative to the working directory.
    Table { path: String },
    #[serde(rename = "float")]
    Metric { value: f64 },
    #[serde(rename = "json")]
    Parameter { value: String, val_type: String },
}

/// Contents of `invocation.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInvocation {
    pub entry_point: EntryPoint,
    pub inputs: Vec<InvocationInput>,
    /// Where the function must write its [`FunctionOutput`].
    pub output_path: String,
    /// Declared output kind (`table`, `float` or `boolean`).
    pub output_type: crate::artifact::ArtifactType,
}

/// Envelope written by the function process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FunctionOutput {
    Table { path: String },
    #[serde(rename = "float")]
    Metric { value: f64 },
    #[serde(rename = "boolean")]
    Check { value: bool },
}

impl FunctionOutput {
    #[must_use]
    pub fn artifact_type(&self) -> crate::artifact::ArtifactType {
        use crate::artifact::ArtifactType;
        match self {
            Self::Table { .. } => ArtifactType::Table,
            Self::Metric { .. } => ArtifactType::Metric,
            Self::Check { .. } => ArtifactType::Check,
        }
    }
}
