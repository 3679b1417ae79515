use async_trait::async_trait;
use aws_sdk_rekognition::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_rekognition::primitives::Blob;
use aws_sdk_rekognition::types::{Image, QualityFilter};
use bytes::Bytes;
use tracing::{instrument, warn};

use super::{
    BoundingBox, FaceMatch, FaceProvider, FaceRecord, IndexOutcome, ProviderError,
    RESOURCE_ALREADY_EXISTS, RESOURCE_NOT_FOUND,
};
use crate::config::{self, IndexingConfig};

/// AWS Rekognition adapter.
pub struct RekognitionProvider {
    client: aws_sdk_rekognition::Client,
    max_faces: i32,
    quality_filter: QualityFilter,
}

impl RekognitionProvider {
    pub async fn new(indexing: &IndexingConfig) -> Self {
        // Calls must finish well inside the queues' visibility timeout.
        let timeouts = aws_config::timeout::TimeoutConfig::builder()
            .operation_timeout(std::time::Duration::from_secs(30))
            .build();

        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .timeout_config(timeouts)
            .load()
            .await;

        Self {
            client: aws_sdk_rekognition::Client::new(&aws_config),
            max_faces: indexing.max_faces_per_image as i32,
            quality_filter: match indexing.quality_filter {
                config::QualityFilter::Auto => QualityFilter::Auto,
                config::QualityFilter::None => QualityFilter::None,
            },
        }
    }
}

#[async_trait]
impl FaceProvider for RekognitionProvider {
    #[instrument(level = "debug", skip(self))]
    async fn create_collection(&self, collection_id: &str) -> Result<(), ProviderError> {
        let result = self
            .client
            .create_collection()
            .collection_id(collection_id)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if error_code(&err) == Some(RESOURCE_ALREADY_EXISTS) => Ok(()),
            Err(err) => Err(classify(err)),
        }
    }

    #[instrument(level = "debug", skip(self))]
    async fn delete_collection(&self, collection_id: &str) -> Result<bool, ProviderError> {
        let result = self
            .client
            .delete_collection()
            .collection_id(collection_id)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) if error_code(&err) == Some(RESOURCE_NOT_FOUND) => Ok(false),
            Err(err) => Err(classify(err)),
        }
    }

    #[instrument(level = "debug", skip(self, image))]
    async fn index_faces(
        &self,
        collection_id: &str,
        image: Bytes,
        external_image_id: &str,
    ) -> Result<IndexOutcome, ProviderError> {
        let response = self
            .client
            .index_faces()
            .collection_id(collection_id)
            .image(Image::builder().bytes(Blob::new(image.to_vec())).build())
            .external_image_id(external_image_id)
            .max_faces(self.max_faces)
            .quality_filter(self.quality_filter.clone())
            .send()
            .await
            .map_err(classify)?;

        let mut faces = Vec::new();
        for record in response.face_records() {
            let Some(face) = record.face() else { continue };
            let Some(face_id) = face.face_id() else {
                warn!(collection_id, "face record without a face id, skipping");
                continue;
            };

            let bb = face.bounding_box();
            faces.push(FaceRecord {
                provider_face_id: face_id.to_string(),
                bounding_box: BoundingBox {
                    w: bb.and_then(|b| b.width()).unwrap_or(0.0),
                    h: bb.and_then(|b| b.height()).unwrap_or(0.0),
                    l: bb.and_then(|b| b.left()).unwrap_or(0.0),
                    t: bb.and_then(|b| b.top()).unwrap_or(0.0),
                },
                // Rekognition reports 0..100.
                confidence: face.confidence().unwrap_or(0.0) / 100.0,
                embedding: None,
            });
        }

        Ok(IndexOutcome {
            faces,
            unindexed: response.unindexed_faces().len(),
            model_version: response.face_model_version().map(ToString::to_string),
        })
    }

    #[instrument(level = "debug", skip(self, image))]
    async fn search_faces_by_image(
        &self,
        collection_id: &str,
        image: Bytes,
        max_results: u32,
        min_similarity: f32,
    ) -> Result<Vec<FaceMatch>, ProviderError> {
        let response = self
            .client
            .search_faces_by_image()
            .collection_id(collection_id)
            .image(Image::builder().bytes(Blob::new(image.to_vec())).build())
            .max_faces(max_results as i32)
            .face_match_threshold(min_similarity * 100.0)
            .send()
            .await
            .map_err(classify)?;

        let matches = response
            .face_matches()
            .iter()
            .filter_map(|m| {
                let face = m.face()?;
                Some(FaceMatch {
                    provider_face_id: face.face_id()?.to_string(),
                    external_image_id: face.external_image_id().map(ToString::to_string),
                    similarity: m.similarity().unwrap_or(0.0) / 100.0,
                })
            })
            .collect();

        Ok(matches)
    }
}

fn error_code<E, R>(err: &SdkError<E, R>) -> Option<&str>
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::ServiceError(context) => context.err().code(),
        _ => None,
    }
}

/// Map an SDK failure onto the pipeline's error taxonomy.
fn classify<E, R>(err: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::ServiceError(context) => {
            let code = context.err().code().unwrap_or("UnknownError").to_string();
            let message = context
                .err()
                .message()
                .unwrap_or("service error")
                .to_string();

            if is_throttle_code(&code) {
                ProviderError::throttle(code, message)
            } else if is_transient_code(&code) {
                ProviderError::retryable(code, message)
            } else {
                ProviderError::terminal(code, message)
            }
        }
        // The request never produced a response; always worth retrying.
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ProviderError::retryable("ConnectionError", format!("{err:?}"))
        }
        _ => ProviderError::terminal("ConstructionError", format!("{err:?}")),
    }
}

fn is_throttle_code(code: &str) -> bool {
    matches!(
        code,
        "ThrottlingException"
            | "ProvisionedThroughputExceededException"
            | "LimitExceededException"
            | "TooManyRequestsException"
            | "RequestLimitExceeded"
            | "SlowDown"
    )
}

fn is_transient_code(code: &str) -> bool {
    matches!(
        code,
        "InternalServerError" | "InternalFailure" | "ServiceUnavailable" | "ServiceUnavailableException"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_codes() {
        assert!(is_throttle_code("ThrottlingException"));
        assert!(is_throttle_code("ProvisionedThroughputExceededException"));
        assert!(is_throttle_code("LimitExceededException"));
        assert!(!is_throttle_code("InvalidParameterException"));
    }

    #[test]
    fn transient_codes() {
        assert!(is_transient_code("InternalServerError"));
        assert!(is_transient_code("ServiceUnavailable"));
        assert!(!is_transient_code("AccessDeniedException"));
    }
}
