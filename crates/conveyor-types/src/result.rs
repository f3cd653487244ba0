//! Per-job result record written to `metadata_path`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Outcome of one job: a stage → text log map and an optional error.
///
/// A result with `error == None` means the job fully succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorResult {
    #[serde(default)]
    pub logs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperatorResult {
    #[must_use]
    pub fn success(logs: BTreeMap<String, String>) -> Self {
        Self { logs, error: None }
    }

    #[must_use]
    pub fn failure(error: impl Into<String>, logs: BTreeMap<String, String>) -> Self {
        Self {
            logs,
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Process exit code for this result.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        u8::from(!self.is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_omits_error_field() {
        let mut logs = BTreeMap::new();
        logs.insert("stdout".to_string(), "hello".to_string());
        let json = serde_json::to_string(&OperatorResult::success(logs)).unwrap();
        assert_eq!(json, r#"{"logs":{"stdout":"hello"}}"#);
    }

    #[test]
    fn failure_sets_exit_code() {
        let result = OperatorResult::failure("boom", BTreeMap::new());
        assert!(!result.is_success());
        assert_eq!(result.exit_code(), 1);
        assert_eq!(OperatorResult::default().exit_code(), 0);
    }

    #[test]
    fn parses_record_without_logs() {
        let result: OperatorResult = serde_json::from_str(r#"{"error":"bad"}"#).unwrap();
        assert_eq!(result.error.as_deref(), Some("bad"));
        assert!(result.logs.is_empty());
    }
}
