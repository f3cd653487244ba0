//! Artifact kinds exchanged between jobs through storage.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a typed artifact.
///
/// The serialized names are the ones the control plane writes into job
/// specs (`table`, `float`, `boolean`, `json`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactType {
    #[serde(rename = "table")]
    Table,
    #[serde(rename = "float")]
    Metric,
    #[serde(rename = "boolean")]
    Check,
    #[serde(rename = "json")]
    Parameter,
}

impl ArtifactType {
    /// Wire name as it appears in specs and function envelopes.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Metric => "float",
            Self::Check => "boolean",
            Self::Parameter => "json",
        }
    }

    /// Whether a user function may consume this kind as an input.
    #[must_use]
    pub fn is_function_input(self) -> bool {
        !matches!(self, Self::Check)
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Table => "table",
            Self::Metric => "metric",
            Self::Check => "check",
            Self::Parameter => "parameter",
        };
        f.write_str(s)
    }
}

/// Severity attached to a check result.
///
/// A failed `Error` check fails the job; a failed `Warning` check is
/// recorded and the job still succeeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckSeverity {
    #[default]
    Warning,
    Error,
}

impl fmt::Display for CheckSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => f.write_str("warning"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// One column of a table artifact's metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

/// Metadata record stored next to every artifact payload.
///
/// Tables carry their column schema; scalar kinds store an empty record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema: Vec<ColumnSchema>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_type_wire_names() {
        let json = serde_json::to_string(&ArtifactType::Metric).unwrap();
        assert_eq!(json, "\"float\"");
        let back: ArtifactType = serde_json::from_str("\"boolean\"").unwrap();
        assert_eq!(back, ArtifactType::Check);
        assert_eq!(ArtifactType::Parameter.as_str(), "json");
    }

    #[test]
    fn display_uses_kind_names() {
        assert_eq!(ArtifactType::Metric.to_string(), "metric");
        assert_eq!(ArtifactType::Check.to_string(), "check");
    }

    #[test]
    fn checks_are_not_function_inputs() {
        assert!(ArtifactType::Table.is_function_input());
        assert!(!ArtifactType::Check.is_function_input());
    }

    #[test]
    fn severity_defaults_to_warning() {
        assert_eq!(CheckSeverity::default(), CheckSeverity::Warning);
        let sev: CheckSeverity = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(sev, CheckSeverity::Error);
    }

    #[test]
    fn scalar_metadata_serializes_empty() {
        let json = serde_json::to_string(&ArtifactMetadata::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
