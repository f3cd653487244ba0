//! Typed artifact encoding.
//!
//! Every artifact becomes a content blob (header + body) and a metadata
//! blob (JSON [`ArtifactMetadata`]). Tables are Arrow IPC streams,
//! metrics an 8-byte little-endian `f64`, checks a pass byte plus a
//! severity byte, parameters a small JSON record.
//!
//! Decoding always names the kind the caller expects and fails with
//! [`CodecError::KindMismatch`] rather than reinterpreting a payload of
//! another kind.

mod frame;
pub(crate) mod ipc;

use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use conveyor_types::artifact::{ArtifactMetadata, ArtifactType, CheckSeverity, ColumnSchema};
use serde::{Deserialize, Serialize};

/// Artifact encode/decode failure.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("expected a {expected} artifact, found a {found} artifact")]
    KindMismatch {
        expected: ArtifactType,
        found: ArtifactType,
    },
    #[error("corrupt artifact payload: {0}")]
    Corrupt(String),
    #[error("unsupported artifact format version {0}")]
    UnsupportedVersion(u8),
    #[error("table metadata does not match payload: {0}")]
    SchemaMismatch(String),
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tabular artifact: one schema, zero or more record batches.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Table {
    /// # Errors
    ///
    /// Returns [`CodecError::SchemaMismatch`] if a batch does not carry
    /// `schema`.
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self, CodecError> {
        if let Some(bad) = batches.iter().position(|b| b.schema() != schema) {
            return Err(CodecError::SchemaMismatch(format!(
                "batch {bad} schema differs from table schema"
            )));
        }
        Ok(Self { schema, batches })
    }

    #[must_use]
    pub fn from_batch(batch: RecordBatch) -> Self {
        Self {
            schema: batch.schema(),
            batches: vec![batch],
        }
    }

    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    #[must_use]
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Column name → type name pairs recorded in the metadata blob.
    #[must_use]
    pub fn column_schema(&self) -> Vec<ColumnSchema> {
        self.schema
            .fields()
            .iter()
            .map(|f| ColumnSchema {
                name: f.name().clone(),
                data_type: f.data_type().to_string(),
            })
            .collect()
    }

    /// All rows as a single batch.
    ///
    /// # Errors
    ///
    /// Returns [`ArrowError`] if the batches cannot be concatenated.
    pub fn concat(&self) -> Result<RecordBatch, ArrowError> {
        concat_batches(&self.schema, &self.batches)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResult {
    pub passed: bool,
    pub severity: CheckSeverity,
}

/// Opaque serialized value with its declared type name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub value: String,
    pub val_type: String,
}

/// A decoded artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Table(Table),
    Metric(f64),
    Check(CheckResult),
    Parameter(ParameterValue),
}

impl Artifact {
    #[must_use]
    pub fn artifact_type(&self) -> ArtifactType {
        match self {
            Self::Table(_) => ArtifactType::Table,
            Self::Metric(_) => ArtifactType::Metric,
            Self::Check(_) => ArtifactType::Check,
            Self::Parameter(_) => ArtifactType::Parameter,
        }
    }
}

/// Content and metadata blobs for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedArtifact {
    pub content: Vec<u8>,
    pub metadata: Vec<u8>,
}

/// Encode an artifact into its content and metadata blobs.
///
/// # Errors
///
/// Returns [`CodecError`] if the table cannot be written as IPC.
pub fn encode(artifact: &Artifact) -> Result<EncodedArtifact, CodecError> {
    let kind = artifact.artifact_type();
    let mut metadata = ArtifactMetadata::default();
    let content = match artifact {
        Artifact::Table(table) => {
            let mut buf = frame::with_header(kind, 0);
            ipc::write_stream(&mut buf, table.schema(), table.batches())?;
            metadata.schema = table.column_schema();
            buf
        }
        Artifact::Metric(value) => {
            let mut buf = frame::with_header(kind, 8);
            buf.extend_from_slice(&value.to_le_bytes());
            buf
        }
        Artifact::Check(check) => {
            let mut buf = frame::with_header(kind, 2);
            buf.push(u8::from(check.passed));
            buf.push(severity_to_byte(check.severity));
            buf
        }
        Artifact::Parameter(param) => {
            let body = serde_json::to_vec(param)?;
            let mut buf = frame::with_header(kind, body.len());
            buf.extend_from_slice(&body);
            buf
        }
    };
    Ok(EncodedArtifact {
        content,
        metadata: serde_json::to_vec(&metadata)?,
    })
}

/// Decode a payload that must be of kind `expected`.
///
/// When `metadata` is given for a table, its column list must agree
/// with the payload schema.
///
/// # Errors
///
/// Returns [`CodecError::KindMismatch`] when the payload is of another
/// kind, or another [`CodecError`] when it is malformed.
pub fn decode(
    expected: ArtifactType,
    content: &[u8],
    metadata: Option<&[u8]>,
) -> Result<Artifact, CodecError> {
    let (found, body) = frame::split(content)?;
    if found != expected {
        return Err(CodecError::KindMismatch { expected, found });
    }
    match found {
        ArtifactType::Table => {
            let (schema, batches) = ipc::read_stream(body)?;
            let table = Table::new(schema, batches)?;
            if let Some(raw) = metadata {
                let recorded: ArtifactMetadata = serde_json::from_slice(raw)?;
                let actual = table.column_schema();
                if recorded.schema != actual {
                    return Err(CodecError::SchemaMismatch(describe_mismatch(
                        &recorded.schema,
                        &actual,
                    )));
                }
            }
            Ok(Artifact::Table(table))
        }
        ArtifactType::Metric => {
            let bytes: [u8; 8] = body
                .try_into()
                .map_err(|_| CodecError::Corrupt(format!("metric body is {} bytes", body.len())))?;
            Ok(Artifact::Metric(f64::from_le_bytes(bytes)))
        }
        ArtifactType::Check => match body {
            [passed @ (0 | 1), severity] => Ok(Artifact::Check(CheckResult {
                passed: *passed == 1,
                severity: severity_from_byte(*severity)?,
            })),
            _ => Err(CodecError::Corrupt(format!(
                "check body is malformed ({} bytes)",
                body.len()
            ))),
        },
        ArtifactType::Parameter => Ok(Artifact::Parameter(serde_json::from_slice(body)?)),
    }
}

/// Name the first column where the metadata and payload schemas differ.
fn describe_mismatch(recorded: &[ColumnSchema], actual: &[ColumnSchema]) -> String {
    let render = |column: Option<&ColumnSchema>| {
        column.map_or_else(
            || "no column".to_string(),
            |c| format!("'{}: {}'", c.name, c.data_type),
        )
    };
    let idx = recorded
        .iter()
        .zip(actual)
        .position(|(r, a)| r != a)
        .unwrap_or_else(|| recorded.len().min(actual.len()));
    format!(
        "column {idx}: metadata has {}, payload has {} ({} vs {} column(s))",
        render(recorded.get(idx)),
        render(actual.get(idx)),
        recorded.len(),
        actual.len()
    )
}

fn severity_to_byte(severity: CheckSeverity) -> u8 {
    match severity {
        CheckSeverity::Warning => 0,
        CheckSeverity::Error => 1,
    }
}

fn severity_from_byte(byte: u8) -> Result<CheckSeverity, CodecError> {
    match byte {
        0 => Ok(CheckSeverity::Warning),
        1 => Ok(CheckSeverity::Error),
        other => Err(CodecError::Corrupt(format!("unknown check severity {other}"))),
    }
}
