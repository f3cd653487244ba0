//! Storage error types.

use std::io;

/// Backend-independent storage failure.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No blob exists at the path.
    #[error("not found: {path}")]
    NotFound { path: String },

    /// The backend refused access, or the path escapes the storage root.
    #[error("permission denied for '{path}': {message}")]
    PermissionDenied { path: String, message: String },

    /// Any other backend failure; a rerun may succeed.
    #[error("transient storage failure for '{path}': {message}")]
    Transient { path: String, message: String },

    /// The backend could not be constructed from its configuration.
    #[error("invalid storage configuration: {0}")]
    Config(String),
}

impl StorageError {
    pub(crate) fn permission_denied(path: &str, message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            path: path.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn from_io(path: &str, err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound {
                path: path.to_string(),
            },
            io::ErrorKind::PermissionDenied => Self::permission_denied(path, err.to_string()),
            _ => Self::Transient {
                path: path.to_string(),
                message: err.to_string(),
            },
        }
    }

    pub(crate) fn from_object_store(path: &str, err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { .. } => Self::NotFound {
                path: path.to_string(),
            },
            object_store::Error::PermissionDenied { .. }
            | object_store::Error::Unauthenticated { .. } => {
                Self::permission_denied(path, err.to_string())
            }
            other => Self::Transient {
                path: path.to_string(),
                message: other.to_string(),
            },
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StorageError>;
