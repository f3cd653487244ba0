//! Object-store implementation of [`Storage`].
//!
//! Wraps any [`ObjectStore`]: S3 in production, the in-memory store in
//! tests.

use std::sync::Arc;

use async_trait::async_trait;
use conveyor_types::storage::S3Config;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};

use crate::backend::Storage;
use crate::credentials;
use crate::error::{self, StorageError};

/// Blobs stored as objects under an optional key prefix.
#[derive(Debug, Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl ObjectStorage {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Option<&str>) -> Self {
        let prefix = prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        Self { store, prefix }
    }

    /// S3 bucket described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] when the client cannot be built.
    pub fn from_s3(config: &S3Config) -> error::Result<Self> {
        let store = build_s3_store(config)?;
        Ok(Self::new(store, config.prefix.as_deref()))
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), None)
    }

    fn location(&self, path: &str) -> error::Result<ObjectPath> {
        let full = match &self.prefix {
            Some(prefix) => format!("{prefix}/{path}"),
            None => path.to_string(),
        };
        let location = ObjectPath::parse(&full)
            .map_err(|e| StorageError::permission_denied(path, e.to_string()))?;
        if path.is_empty() || location.parts().count() == 0 {
            return Err(StorageError::permission_denied(path, "empty path"));
        }
        Ok(location)
    }
}

/// Build an S3 client for `config`.
///
/// Credentials come from the shared-credentials file when
/// `credentials_path` is set, otherwise from the standard AWS
/// environment variables.
///
/// # Errors
///
/// Returns [`StorageError::Config`] when the credentials file is
/// unusable or the builder rejects the configuration.
pub fn build_s3_store(config: &S3Config) -> error::Result<Arc<dyn ObjectStore>> {
    let mut builder = match &config.credentials_path {
        Some(path) => {
            let profile = config.credentials_profile.as_deref().unwrap_or("default");
            let creds = credentials::load(path, profile)?;
            let mut builder = AmazonS3Builder::new()
                .with_access_key_id(creds.access_key_id)
                .with_secret_access_key(creds.secret_access_key);
            if let Some(token) = creds.session_token {
                builder = builder.with_token(token);
            }
            builder
        }
        None => AmazonS3Builder::from_env(),
    };
    builder = builder
        .with_bucket_name(&config.bucket)
        .with_region(&config.region);
    if let Some(endpoint) = &config.endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(endpoint.starts_with("http://"));
    }
    let store = builder
        .build()
        .map_err(|e| StorageError::Config(e.to_string()))?;
    Ok(Arc::new(store))
}

#[async_trait]
impl Storage for ObjectStorage {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> error::Result<()> {
        let location = self.location(path)?;
        let len = bytes.len();
        self.store
            .put(&location, PutPayload::from(bytes))
            .await
            .map_err(|e| StorageError::from_object_store(path, e))?;
        tracing::debug!(path, bytes = len, "stored object");
        Ok(())
    }

    async fn get(&self, path: &str) -> error::Result<Vec<u8>> {
        let location = self.location(path)?;
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| StorageError::from_object_store(path, e))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| StorageError::from_object_store(path, e))?;
        Ok(bytes.to_vec())
    }

    async fn exists(&self, path: &str) -> error::Result<bool> {
        let location = self.location(path)?;
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::from_object_store(path, e)),
        }
    }

    async fn delete(&self, path: &str) -> error::Result<()> {
        let location = self.location(path)?;
        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(StorageError::from_object_store(path, e)),
        }
    }
}
