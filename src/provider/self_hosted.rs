use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::instrument;

use super::{FaceMatch, FaceProvider, FaceRecord, IndexOutcome, ProviderError};
use crate::config::{self, SelfHostedProviderConfig};

/// Adapter for a self-hosted face-detection service.
///
/// The service owns detection, embedding and vector search; this adapter
/// only speaks its JSON protocol and maps failures onto the pipeline's
/// error taxonomy. Bounding boxes, confidences and similarities arrive
/// already normalized to 0..1.
pub struct SelfHostedProvider {
    client: reqwest::Client,
    base_url: String,
    max_faces: u32,
    quality_filter: &'static str,
}

#[derive(Debug, Deserialize)]
struct IndexResponse {
    faces: Vec<FaceRecord>,
    #[serde(default)]
    unindexed_count: usize,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    matches: Vec<FaceMatch>,
}

impl SelfHostedProvider {
    pub fn new(
        provider: &SelfHostedProviderConfig,
        indexing: &config::IndexingConfig,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(provider.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: provider.url.expose().trim_end_matches('/').to_string(),
            max_faces: indexing.max_faces_per_image,
            quality_filter: match indexing.quality_filter {
                config::QualityFilter::Auto => "auto",
                config::QualityFilter::None => "none",
            },
        })
    }

    fn collection_url(&self, collection_id: &str) -> String {
        format!("{}/collections/{collection_id}", self.base_url)
    }
}

#[async_trait]
impl FaceProvider for SelfHostedProvider {
    #[instrument(level = "debug", skip(self))]
    async fn create_collection(&self, collection_id: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .put(self.collection_url(collection_id))
            .send()
            .await
            .map_err(transport_error)?;

        // A collection that already exists is a success.
        if response.status() == StatusCode::CONFLICT {
            return Ok(());
        }

        check_status(response).await.map(drop)
    }

    #[instrument(level = "debug", skip(self))]
    async fn delete_collection(&self, collection_id: &str) -> Result<bool, ProviderError> {
        let response = self
            .client
            .delete(self.collection_url(collection_id))
            .send()
            .await
            .map_err(transport_error)?;

        // Deleting a collection that is already gone is a success.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }

        check_status(response).await.map(|_| true)
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
            .post(format!("{}/faces", self.collection_url(collection_id)))
            .query(&[
                ("external_image_id", external_image_id.to_string()),
                ("max_faces", self.max_faces.to_string()),
                ("quality_filter", self.quality_filter.to_string()),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image)
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response).await?;
        let body: IndexResponse = response.json().await.map_err(decode_error)?;

        Ok(IndexOutcome {
            faces: body.faces,
            unindexed: body.unindexed_count,
            model_version: body.model_version,
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
            .post(format!("{}/search", self.collection_url(collection_id)))
            .query(&[
                ("max_results", max_results.to_string()),
                ("min_similarity", min_similarity.to_string()),
            ])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image)
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response).await?;
        let body: SearchResponse = response.json().await.map_err(decode_error)?;

        Ok(body.matches)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(status_error(status, message))
}

fn status_error(status: StatusCode, message: String) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::throttle("ThrottlingException", message)
    } else if status.is_server_error() {
        ProviderError::retryable(format!("ServerError{}", status.as_u16()), message)
    } else {
        ProviderError::terminal(format!("ClientError{}", status.as_u16()), message)
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    ProviderError::retryable("ConnectionError", err.to_string())
}

fn decode_error(err: reqwest::Error) -> ProviderError {
    ProviderError::terminal("InvalidResponse", err.to_string())
}
