//! Structured error model for connector operations.
//!
//! [`ConnectorError`] carries a classification, an advisory retry flag and
//! optional diagnostic details. Construct via category-specific factory
//! methods.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a connector error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid connector configuration or parameters.
    Config,
    /// Authentication failure.
    Auth,
    /// Insufficient permissions.
    Permission,
    /// Transient network error (retryable).
    TransientNetwork,
    /// Transient database error (retryable).
    TransientDb,
    /// Invalid or corrupt data.
    Data,
    /// Schema mismatch or unsupported column type.
    Schema,
    /// Internal connector error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Auth => "auth",
            Self::Permission => "permission",
            Self::TransientNetwork => "transient_network",
            Self::TransientDb => "transient_db",
            Self::Data => "data",
            Self::Schema => "schema",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Structured error from a connector operation.
///
/// `retryable` is advisory: the runtime never retries, but the control
/// plane reads it from the job metadata to decide whether a rerun makes
/// sense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct ConnectorError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ConnectorError {
    fn new(
        category: ErrorCategory,
        retryable: bool,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retryable,
            details: None,
        }
    }

    /// Configuration error (not retryable).
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, false, code, message)
    }

    /// Authentication error (not retryable).
    #[must_use]
    pub fn auth(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Auth, false, code, message)
    }

    /// Permission error (not retryable).
    #[must_use]
    pub fn permission(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Permission, false, code, message)
    }

    /// Transient network error (retryable).
    #[must_use]
    pub fn transient_network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientNetwork, true, code, message)
    }

    /// Transient database error (retryable).
    #[must_use]
    pub fn transient_db(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::TransientDb, true, code, message)
    }

    /// Data validation error (not retryable).
    #[must_use]
    pub fn data(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Data, false, code, message)
    }

    /// Schema mismatch error (not retryable).
    #[must_use]
    pub fn schema(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Schema, false, code, message)
    }

    /// Internal connector error (not retryable).
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, false, code, message)
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_defaults() {
        let err = ConnectorError::config("MISSING_HOST", "host is required");
        assert_eq!(err.category, ErrorCategory::Config);
        assert!(!err.retryable);
        assert!(err.details.is_none());
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(ConnectorError::transient_network("TIMEOUT", "timed out").retryable);
        assert!(ConnectorError::transient_db("DEADLOCK", "deadlock").retryable);
        assert!(!ConnectorError::data("BAD_ROW", "bad row").retryable);
    }

    #[test]
    fn serde_roundtrip() {
        let err = ConnectorError::auth("BAD_PASSWORD", "password rejected")
            .with_details(serde_json::json!({"host": "db.internal"}));
        let json = serde_json::to_string(&err).unwrap();
        let back: ConnectorError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }

    #[test]
    fn display_format() {
        let err = ConnectorError::transient_db("QUERY_FAILED", "relation does not exist");
        assert_eq!(
            err.to_string(),
            "[transient_db] QUERY_FAILED: relation does not exist"
        );
    }
}
