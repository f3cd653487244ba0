//! Reading and writing artifacts through a [`Storage`] backend.
//!
//! Batched reads run concurrently on the job's task; results always come
//! back in request order.

use conveyor_storage::Storage;
use conveyor_types::artifact::ArtifactType;
use futures::future::try_join_all;

use crate::codec::{self, Artifact};
use crate::errors::JobError;

/// Where to find one stored artifact and which kind it must be.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactRef<'a> {
    pub content_path: &'a str,
    pub metadata_path: &'a str,
    pub expected: ArtifactType,
}

/// Where to store one artifact.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactDest<'a> {
    pub content_path: &'a str,
    pub metadata_path: &'a str,
}

/// Fetch and decode one artifact.
///
/// # Errors
///
/// Returns [`JobError::Storage`] if either blob is unreadable, or
/// [`JobError::ResultTypeMismatch`] / [`JobError::Codec`] if the payload
/// is of the wrong kind or malformed.
pub async fn read_artifact(
    storage: &dyn Storage,
    reference: ArtifactRef<'_>,
) -> Result<Artifact, JobError> {
    let content = storage.get(reference.content_path).await?;
    let metadata = storage.get(reference.metadata_path).await?;
    let artifact = codec::decode(reference.expected, &content, Some(&metadata)).map_err(|e| {
        match JobError::from(e) {
            JobError::ResultTypeMismatch {
                expected, found, ..
            } => JobError::ResultTypeMismatch {
                context: format!("artifact at '{}'", reference.content_path),
                expected,
                found,
            },
            other => other,
        }
    })?;
    tracing::debug!(
        path = reference.content_path,
        kind = %reference.expected,
        "read artifact"
    );
    Ok(artifact)
}

/// Fetch and decode several artifacts; output order matches `references`.
///
/// # Errors
///
/// Returns the first error encountered, as [`read_artifact`] does.
pub async fn read_artifacts(
    storage: &dyn Storage,
    references: &[ArtifactRef<'_>],
) -> Result<Vec<Artifact>, JobError> {
    try_join_all(references.iter().map(|r| read_artifact(storage, *r))).await
}

/// Encode and store one artifact, content first.
///
/// # Errors
///
/// Returns [`JobError::Codec`] if encoding fails or
/// [`JobError::Storage`] if a write fails.
pub async fn write_artifact(
    storage: &dyn Storage,
    dest: ArtifactDest<'_>,
    artifact: &Artifact,
) -> Result<(), JobError> {
    let encoded = codec::encode(artifact)?;
    storage.put(dest.content_path, encoded.content).await?;
    storage.put(dest.metadata_path, encoded.metadata).await?;
    tracing::debug!(
        path = dest.content_path,
        kind = %artifact.artifact_type(),
        "wrote artifact"
    );
    Ok(())
}
