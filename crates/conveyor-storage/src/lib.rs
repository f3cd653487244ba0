//! Artifact storage for conveyor jobs.
//!
//! Provides the [`Storage`] trait with a [`LocalStorage`] implementation
//! rooted at a directory and an [`ObjectStorage`] implementation over
//! S3 (or an in-memory store for tests). A job picks its backend once
//! via [`open`] and keeps it for its whole lifetime.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod credentials;
pub mod error;
pub mod local;
pub mod object;

use conveyor_types::storage::StorageConfig;

pub use backend::Storage;
pub use error::StorageError;
pub use local::LocalStorage;
pub use object::ObjectStorage;

/// Build the backend selected by `config`.
///
/// # Errors
///
/// Returns [`StorageError::Config`] when the object store client cannot
/// be constructed (bad region, unreadable credentials file, ...).
pub fn open(config: &StorageConfig) -> error::Result<Box<dyn Storage>> {
    match config {
        StorageConfig::File(file) => Ok(Box::new(LocalStorage::new(&file.directory))),
        StorageConfig::S3(s3) => Ok(Box::new(ObjectStorage::from_s3(s3)?)),
    }
}
