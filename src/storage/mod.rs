use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{
    Attribute, AttributeValue, Attributes, ClientOptions, DynObjectStore, ObjectStore as _,
    ObjectStoreExt as _, PutOptions,
};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::config::StorageConfig;

/// Prefix under which presigned uploads land. Everything else in the bucket
/// is pipeline-owned output.
pub const UPLOAD_PREFIX: &str = "uploads/";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object {key} not found")]
    NotFound { key: String },
    #[error("object store error: {0}")]
    Backend(object_store::Error),
}

impl StorageError {
    /// Whether a retry has any chance of succeeding.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotFound { .. } => false,
            Self::Backend(error) => !matches!(
                error,
                object_store::Error::InvalidPath { .. }
                    | object_store::Error::NotSupported { .. }
                    | object_store::Error::NotImplemented { .. }
                    | object_store::Error::PermissionDenied { .. }
                    | object_store::Error::Unauthenticated { .. }
                    | object_store::Error::UnknownConfigurationKey { .. }
            ),
        }
    }

    fn from_backend(key: &str, error: object_store::Error) -> Self {
        if matches!(error, object_store::Error::NotFound { .. }) {
            Self::NotFound {
                key: key.to_string(),
            }
        } else {
            Self::Backend(error)
        }
    }
}

/// The bucket holding raw uploads and normalized photos.
///
/// R2 in production; any S3-compatible endpoint in development and the
/// in-memory implementation in tests.
pub struct Storage {
    store: Arc<DynObjectStore>,
}

impl Storage {
    pub fn new(config: &StorageConfig) -> anyhow::Result<Self> {
        // Requests must finish well inside the queues' visibility timeout.
        let client_options = ClientOptions::new().with_timeout(Duration::from_secs(30));

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_allow_http(config.allow_http)
            .with_client_options(client_options);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }
        if let Some(access_key_id) = &config.access_key_id {
            builder = builder.with_access_key_id(access_key_id);
        }
        if let Some(secret_access_key) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret_access_key);
        }

        Ok(Self {
            store: Arc::new(builder.build()?),
        })
    }

    /// An in-memory store for tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(object_store::memory::InMemory::new()),
        }
    }

    /// Object size in bytes without downloading the body.
    #[instrument(level = "debug", skip(self))]
    pub async fn size(&self, key: &str) -> Result<u64, StorageError> {
        let meta = self
            .store
            .head(&Path::from(key))
            .await
            .map_err(|e| StorageError::from_backend(key, e))?;

        Ok(meta.size)
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let result = self
            .store
            .get(&Path::from(key))
            .await
            .map_err(|e| StorageError::from_backend(key, e))?;

        result
            .bytes()
            .await
            .map_err(|e| StorageError::from_backend(key, e))
    }

    /// Store a normalized photo under its final key.
    #[instrument(level = "debug", skip(self, bytes))]
    pub async fn put_jpeg(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let attributes = Attributes::from_iter([(
            Attribute::ContentType,
            AttributeValue::from("image/jpeg"),
        )]);

        self.store
            .put_opts(
                &Path::from(key),
                bytes.into(),
                PutOptions {
                    attributes,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| StorageError::from_backend(key, e))?;

        Ok(())
    }

    /// Delete an object. A missing object counts as deleted.
    #[instrument(level = "debug", skip(self))]
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self.store.delete(&Path::from(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(StorageError::Backend(e)),
        }
    }
}

/// Final key of a normalized photo.
#[must_use]
pub fn photo_key(event_id: Uuid, photo_id: Uuid) -> String {
    format!("{event_id}/{photo_id}.jpg")
}

/// Whether an object key belongs to the presigned-upload namespace.
#[must_use]
pub fn is_upload_key(key: &str) -> bool {
    key.starts_with(UPLOAD_PREFIX)
}
