//! Job error model.

use conveyor_storage::StorageError;
use conveyor_types::error::ConnectorError;
use conveyor_types::spec::SpecError;

use crate::codec::CodecError;
use crate::package::PackageError;

// ---------------------------------------------------------------------------
// JobError: every way a job can fail
// ---------------------------------------------------------------------------

/// Failure of a single job.
///
/// Every variant is caught at the runner boundary, rendered into the
/// metadata record and turned into exit code 1. Nothing here is retried
/// in-process.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Malformed or incomplete spec. Raised before any I/O.
    #[error("spec parse error: {0}")]
    SpecParse(#[from] SpecError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("expected {expected} input artifact(s), but got {found}")]
    InputArityMismatch { expected: usize, found: usize },

    #[error("result type mismatch for {context}: expected {expected}, found {found}")]
    ResultTypeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    /// Function packaging failure (path escape, reserved name, I/O).
    #[error(transparent)]
    Package(#[from] PackageError),

    #[error("unknown connector name '{0}'")]
    UnknownConnector(String),

    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),

    /// The user function failed: non-zero exit, timeout or missing output.
    #[error("function execution failed: {0}")]
    FunctionExecution(String),

    /// A stored payload could not be decoded.
    #[error("artifact codec error: {0}")]
    Codec(CodecError),

    /// An error-severity check evaluated to false.
    #[error("check '{0}' failed")]
    CheckFailed(String),

    #[error("invalid workflow graph: {0}")]
    InvalidDag(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CodecError> for JobError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::KindMismatch { expected, found } => Self::ResultTypeMismatch {
                context: "stored artifact".to_string(),
                expected: expected.to_string(),
                found: found.to_string(),
            },
            other => Self::Codec(other),
        }
    }
}

impl JobError {
    pub(crate) fn type_mismatch(
        context: impl Into<String>,
        expected: impl ToString,
        found: impl ToString,
    ) -> Self {
        Self::ResultTypeMismatch {
            context: context.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// Returns the typed connector error if this is a `Connector` variant.
    #[must_use]
    pub fn as_connector_error(&self) -> Option<&ConnectorError> {
        match self {
            Self::Connector(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the failure is marked worth rerunning by the control plane.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connector(e) => e.retryable,
            Self::Storage(StorageError::Transient { .. }) => true,
            _ => false,
        }
    }
}
