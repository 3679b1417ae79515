use std::sync::Arc;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::app::App;
use crate::database;
use crate::database::methods::DbMethods as _;
use crate::database::transaction::{CompleteUpload, CompleteUploadError};
use crate::database::types::{IntentStatus, NewPhoto, UploadEventMessage, UploadIntent};
use crate::media::{self, MediaError};
use crate::retry::backoff_delay;
use crate::storage::{self, StorageError};

/// Object-create actions that start the pipeline; anything else is noise
/// from the bucket notification feed.
const ACCEPTED_ACTIONS: [&str; 2] = ["PutObject", "CompleteMultipartUpload"];

const UPLOAD_BATCH_SIZE: i64 = 10;

#[derive(Debug, Error)]
enum UploadError {
    #[error("no upload intent matches the object key")]
    Orphan,
    #[error("upload intent expired before the object arrived")]
    Expired { intent_id: Uuid },
    #[error("uploaded object vanished before processing")]
    ObjectMissing { intent_id: Uuid },
    #[error("object size {size} exceeds the upload limit")]
    SizeExceeded { intent_id: Uuid, size: u64 },
    #[error("object is not an accepted image format")]
    InvalidMagicBytes { intent_id: Uuid },
    #[error("photographer has no usable credits")]
    InsufficientCredits { intent_id: Uuid },
    #[error("normalization failed: {source}")]
    Normalization {
        intent_id: Uuid,
        source: MediaError,
    },
    #[error(transparent)]
    Database(#[from] database::Error),
    #[error("storage error: {0}")]
    Storage(StorageError),
}

/// Consume object-create notifications and turn accepted uploads into
/// normalized, credit-debited photo rows.
pub async fn process_uploads(app: Arc<App>) -> anyhow::Result<()> {
    info!("Starting upload processor.");

    loop {
        let messages = app
            .database
            .claim_upload_events(UPLOAD_BATCH_SIZE, app.config.app.visibility_timeout)
            .await?;

        if messages.is_empty() {
            sleep(app.config.app.queue_poll_interval).await;
            continue;
        }

        // Each message runs a multi-step pipeline ending in a row-locked
        // transaction; within a batch they are handled one at a time.
        for message in messages {
            handle_notification(&app, &message).await?;
        }
    }
}

#[instrument(level = "info", skip(app, message), fields(object_key = %message.object_key))]
async fn handle_notification(app: &App, message: &UploadEventMessage) -> anyhow::Result<()> {
    let db = &app.database;

    if !ACCEPTED_ACTIONS.contains(&message.action.as_str())
        || !storage::is_upload_key(&message.object_key)
    {
        db.ack_upload_event(message.id).await?;
        return Ok(());
    }

    match process_notification(app, message).await {
        Ok(()) => {
            db.ack_upload_event(message.id).await?;
        }
        Err(UploadError::Orphan) => {
            // Nothing reserved this key; drop the stray object.
            delete_object(app, &message.object_key).await;
            db.ack_upload_event(message.id).await?;
        }
        Err(UploadError::Expired { intent_id }) => {
            delete_object(app, &message.object_key).await;
            db.mark_intent_expired(intent_id).await?;
            db.ack_upload_event(message.id).await?;
        }
        Err(UploadError::ObjectMissing { intent_id }) => {
            db.mark_intent_failed(intent_id, "object_missing", "uploaded object not found", false)
                .await?;
            db.ack_upload_event(message.id).await?;
        }
        Err(err @ UploadError::SizeExceeded { intent_id, .. }) => {
            delete_object(app, &message.object_key).await;
            db.mark_intent_failed(intent_id, "size_exceeded", &err.to_string(), false)
                .await?;
            db.ack_upload_event(message.id).await?;
        }
        Err(err @ UploadError::InvalidMagicBytes { intent_id }) => {
            delete_object(app, &message.object_key).await;
            db.mark_intent_failed(intent_id, "invalid_magic_bytes", &err.to_string(), false)
                .await?;
            db.ack_upload_event(message.id).await?;
        }
        Err(err @ UploadError::InsufficientCredits { intent_id }) => {
            // The object is kept so the user can top up and try again.
            db.mark_intent_failed(intent_id, "insufficient_credits", &err.to_string(), true)
                .await?;
            db.ack_upload_event(message.id).await?;
        }
        Err(err @ UploadError::Normalization { intent_id, .. }) => {
            warn!(%intent_id, error = %err, "Normalization failed");
            db.mark_intent_failed(intent_id, "normalization_failed", &err.to_string(), true)
                .await?;
            retry_or_dead_letter(app, message, &err.to_string()).await?;
        }
        Err(err @ (UploadError::Database(_) | UploadError::Storage(_))) => {
            warn!(error = %err, "Transient failure processing upload");
            retry_or_dead_letter(app, message, &err.to_string()).await?;
        }
    }

    Ok(())
}

async fn retry_or_dead_letter(
    app: &App,
    message: &UploadEventMessage,
    error: &str,
) -> anyhow::Result<()> {
    let db = &app.database;

    if message.attempts >= app.config.app.max_attempts {
        warn!(
            object_key = %message.object_key,
            attempts = message.attempts,
            error,
            "Upload notification exhausted its retries, dropping"
        );
        db.ack_upload_event(message.id).await?;
    } else {
        let delay = backoff_delay(message.attempts, &app.config.backoff);
        db.retry_upload_event(message.id, delay).await?;
    }

    Ok(())
}

/// The actual pipeline. Any failure maps onto the taxonomy above; the
/// caller turns it into object cleanup, an intent transition and a message
/// disposition.
async fn process_notification(app: &App, message: &UploadEventMessage) -> Result<(), UploadError> {
    let db = &app.database;

    let intent = db
        .get_intent_by_key(&message.object_key)
        .await?
        .ok_or(UploadError::Orphan)?;

    if let Some(done) = short_circuit(app, &intent).await? {
        return done;
    }

    // Delivery may lag; expiry is judged against the moment the object was
    // actually written, not the moment we got around to processing it.
    if intent.expires_at < message.event_time {
        return Err(UploadError::Expired {
            intent_id: intent.id,
        });
    }

    let size = app
        .storage
        .size(&message.object_key)
        .await
        .map_err(|e| storage_error(e, intent.id))?;
    if size > app.config.upload.max_file_size {
        return Err(UploadError::SizeExceeded {
            intent_id: intent.id,
            size,
        });
    }

    let original = app
        .storage
        .get(&message.object_key)
        .await
        .map_err(|e| storage_error(e, intent.id))?;

    let kind = media::sniff(&original).ok_or(UploadError::InvalidMagicBytes {
        intent_id: intent.id,
    })?;

    let normalized = media::normalize(
        original.clone(),
        app.config.upload.normalize_max_dim,
        app.config.upload.normalize_quality,
    )
    .await
    .map_err(|source| UploadError::Normalization {
        intent_id: intent.id,
        source,
    })?;

    let photo_id = Uuid::new_v4();
    let final_key = storage::photo_key(intent.event_id, photo_id);

    app.storage
        .put_jpeg(&final_key, normalized.bytes.clone())
        .await
        .map_err(|e| storage_error(e, intent.id))?;

    let photo = NewPhoto {
        id: photo_id,
        event_id: intent.event_id,
        r2_key: final_key,
        width: normalized.width as i32,
        height: normalized.height as i32,
        file_size: normalized.bytes.len() as i64,
        original_mime_type: kind.mime_type().to_string(),
        original_file_size: original.len() as i64,
    };

    let outcome = db
        .complete_upload(intent.id, intent.photographer_id, &photo)
        .await
        .map_err(|err| match err {
            CompleteUploadError::InsufficientCredits => UploadError::InsufficientCredits {
                intent_id: intent.id,
            },
            CompleteUploadError::Database(e) => UploadError::Database(e),
        })?;

    match outcome {
        CompleteUpload::Committed => {
            // The raw upload is no longer needed; its photo now lives under
            // the event-scoped key.
            delete_object(app, &message.object_key).await;
        }
        CompleteUpload::AlreadySettled => {
            // A competing delivery won the intent; drop this delivery's
            // normalized object so nothing unreferenced lingers.
            delete_object(app, &photo.r2_key).await;
        }
    }

    Ok(())
}

/// Idempotency for re-delivered notifications: terminal intents are settled
/// without side effects, except for retryable failures which run the
/// pipeline again.
async fn short_circuit(
    app: &App,
    intent: &UploadIntent,
) -> Result<Option<Result<(), UploadError>>, UploadError> {
    match intent.status {
        IntentStatus::Completed => {
            if let Some(photo_id) = intent.photo_id {
                if app.database.get_photo(photo_id).await?.is_some() {
                    return Ok(Some(Ok(())));
                }
            }
            // Completed without a surviving photo row should not happen;
            // settle the message rather than loop forever.
            warn!(intent_id = %intent.id, "Completed intent without a photo row");
            Ok(Some(Ok(())))
        }
        IntentStatus::Failed if intent.retryable == Some(true) => Ok(None),
        IntentStatus::Failed | IntentStatus::Expired => Ok(Some(Ok(()))),
        IntentStatus::Pending | IntentStatus::Processing => Ok(None),
    }
}

fn storage_error(err: StorageError, intent_id: Uuid) -> UploadError {
    match err {
        StorageError::NotFound { .. } => UploadError::ObjectMissing { intent_id },
        other => UploadError::Storage(other),
    }
}

async fn delete_object(app: &App, key: &str) {
    // Best effort; a leftover object is reclaimed by a later sweep.
    if let Err(error) = app.storage.delete(key).await {
        warn!(key, %error, "Failed to delete object");
    }
}
