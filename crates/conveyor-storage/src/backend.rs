//! Storage trait definition.

use async_trait::async_trait;

use crate::error;

/// Blob storage scoped to a configured root.
///
/// Paths are opaque, relative strings. Implementations must be
/// `Send + Sync` for use behind `&dyn Storage` across await points.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `bytes` at `path`, replacing any existing blob.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`](crate::error::StorageError) on backend failure.
    async fn put(&self, path: &str, bytes: Vec<u8>) -> error::Result<()>;

    /// Read the blob at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`](crate::error::StorageError::NotFound)
    /// when nothing is stored there.
    async fn get(&self, path: &str) -> error::Result<Vec<u8>>;

    /// Whether a blob exists at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`](crate::error::StorageError) on backend failure.
    async fn exists(&self, path: &str) -> error::Result<bool>;

    /// Remove the blob at `path`. Removing a missing blob succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`](crate::error::StorageError) on backend failure.
    async fn delete(&self, path: &str) -> error::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify the trait is object-safe (can be used as `dyn Storage`).
    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn Storage) {}
    }
}
