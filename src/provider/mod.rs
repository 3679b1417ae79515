use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::ErrorKind;

pub mod rekognition;
pub mod self_hosted;

/// A face detected and indexed by the provider.
///
/// Geometry is in ratios of the image dimensions; confidence is normalized
/// to 0..1 before it leaves any adapter. The embedding is present only for
/// providers that expose raw vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub provider_face_id: String,
    pub bounding_box: BoundingBox,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Face geometry as ratios (0..1) of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub w: f32,
    pub h: f32,
    pub l: f32,
    pub t: f32,
}

#[derive(Debug, Clone, Default)]
pub struct IndexOutcome {
    pub faces: Vec<FaceRecord>,
    /// Faces the provider saw but declined to index (quality filter).
    pub unindexed: usize,
    pub model_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub provider_face_id: String,
    /// The photo id supplied at indexing time, when the provider kept it.
    pub external_image_id: Option<String>,
    /// Normalized to 0..1.
    pub similarity: f32,
}

/// A provider failure with enough metadata to classify it.
#[derive(Debug, Clone, Error)]
#[error("{name}: {message}")]
pub struct ProviderError {
    /// Provider-assigned error name, e.g. `ThrottlingException`.
    pub name: String,
    pub message: String,
    pub retryable: bool,
    pub throttle: bool,
}

impl ProviderError {
    #[must_use]
    pub fn terminal(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            retryable: false,
            throttle: false,
        }
    }

    #[must_use]
    pub fn retryable(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            retryable: true,
            throttle: false,
        }
    }

    #[must_use]
    pub fn throttle(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            retryable: true,
            throttle: true,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        if self.throttle {
            ErrorKind::Throttle
        } else if self.retryable {
            ErrorKind::Retryable
        } else {
            ErrorKind::Terminal
        }
    }
}

/// Error names shared by both adapters for idempotency mapping.
pub(crate) const RESOURCE_ALREADY_EXISTS: &str = "ResourceAlreadyExistsException";
pub(crate) const RESOURCE_NOT_FOUND: &str = "ResourceNotFoundException";

/// The face-recognition engine, one collection per event.
///
/// Implementations are interchangeable; the pipeline never looks past this
/// interface. Both creation and deletion are idempotent: "already exists"
/// and "already gone" are successes, not errors.
#[async_trait]
pub trait FaceProvider: Send + Sync {
    /// Create the collection. Returns `Ok` when it already existed.
    async fn create_collection(&self, collection_id: &str) -> Result<(), ProviderError>;

    /// Delete the collection. `Ok(false)` means it was already gone.
    async fn delete_collection(&self, collection_id: &str) -> Result<bool, ProviderError>;

    /// Detect and index the faces in `image`, tagging them with
    /// `external_image_id` for later search results.
    async fn index_faces(
        &self,
        collection_id: &str,
        image: Bytes,
        external_image_id: &str,
    ) -> Result<IndexOutcome, ProviderError>;

    /// Find indexed faces similar to the ones in `image`.
    async fn search_faces_by_image(
        &self,
        collection_id: &str,
        image: Bytes,
        max_results: u32,
        min_similarity: f32,
    ) -> Result<Vec<FaceMatch>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_classification() {
        assert_eq!(
            ProviderError::terminal("InvalidParameterException", "bad input").kind(),
            ErrorKind::Terminal
        );
        assert_eq!(
            ProviderError::retryable("InternalServerError", "oops").kind(),
            ErrorKind::Retryable
        );
        assert_eq!(
            ProviderError::throttle("ThrottlingException", "slow down").kind(),
            ErrorKind::Throttle
        );
    }
}
