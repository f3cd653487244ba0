//! Filesystem-backed implementation of [`Storage`].

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use uuid::Uuid;

use crate::backend::Storage;
use crate::error::{self, StorageError};

/// Blobs stored as files under a root directory.
///
/// Writes land in a uniquely named sibling temp file first and are
/// renamed into place, so a killed job never leaves a truncated blob at
/// its final path.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a storage path to a file under the root.
    fn resolve(&self, path: &str) -> error::Result<PathBuf> {
        if path.is_empty() {
            return Err(StorageError::permission_denied(path, "empty path"));
        }
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::permission_denied(
                        path,
                        "path escapes the storage root",
                    ));
                }
            }
        }
        if resolved == self.root {
            return Err(StorageError::permission_denied(path, "path names the storage root"));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> error::Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::from_io(path, &e))?;
        }

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staging = target.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        if let Err(e) = fs::write(&staging, &bytes).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::from_io(path, &e));
        }
        if let Err(e) = fs::rename(&staging, &target).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::from_io(path, &e));
        }

        tracing::debug!(path, bytes = bytes.len(), "stored blob");
        Ok(())
    }

    async fn get(&self, path: &str) -> error::Result<Vec<u8>> {
        let target = self.resolve(path)?;
        fs::read(&target)
            .await
            .map_err(|e| StorageError::from_io(path, &e))
    }

    async fn exists(&self, path: &str) -> error::Result<bool> {
        let target = self.resolve(path)?;
        match fs::metadata(&target).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from_io(path, &e)),
        }
    }

    async fn delete(&self, path: &str) -> error::Result<()> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(path, &e)),
        }
    }
}
