//! Storage backend selection.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Local filesystem root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    pub directory: PathBuf,
}

/// S3 (or S3-compatible) bucket root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Key prefix every artifact path is placed under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Custom endpoint for S3-compatible stores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// AWS shared-credentials file; the environment is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_profile: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    File,
    S3,
}

/// Exactly one storage backend for the lifetime of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStorageConfig", into = "RawStorageConfig")]
pub enum StorageConfig {
    File(FileConfig),
    S3(S3Config),
}

impl StorageConfig {
    #[must_use]
    pub fn storage_type(&self) -> StorageType {
        match self {
            Self::File(_) => StorageType::File,
            Self::S3(_) => StorageType::S3,
        }
    }
}

/// Wire form: a type tag plus one populated variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawStorageConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<StorageType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_config: Option<FileConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    s3_config: Option<S3Config>,
}

impl TryFrom<RawStorageConfig> for StorageConfig {
    type Error = String;

    fn try_from(raw: RawStorageConfig) -> Result<Self, Self::Error> {
        let config = match (raw.file_config, raw.s3_config) {
            (Some(file), None) => Self::File(file),
            (None, Some(s3)) => Self::S3(s3),
            (None, None) => {
                return Err("storage_config must set one of file_config or s3_config".into())
            }
            (Some(_), Some(_)) => {
                return Err("storage_config must not set both file_config and s3_config".into())
            }
        };
        match raw.kind {
            Some(kind) if kind != config.storage_type() => Err(format!(
                "storage_config type {kind:?} does not match the populated backend"
            )),
            _ => Ok(config),
        }
    }
}

impl From<StorageConfig> for RawStorageConfig {
    fn from(config: StorageConfig) -> Self {
        let kind = Some(config.storage_type());
        match config {
            StorageConfig::File(file) => Self {
                kind,
                file_config: Some(file),
                s3_config: None,
            },
            StorageConfig::S3(s3) => Self {
                kind,
                file_config: None,
                s3_config: Some(s3),
            },
        }
    }
}
