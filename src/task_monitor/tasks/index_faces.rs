use std::sync::Arc;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

use crate::app::App;
use crate::database::methods::DbMethods as _;
use crate::database::types::{PhotoJob, PhotoStatus};
use crate::database;
use crate::media;
use crate::provider::ProviderError;
use crate::retry::{delay_for, ErrorKind};
use crate::storage::StorageError;
use crate::task_monitor::TaskMonitor;

/// Ceilings for the best-effort shrink applied when an image exceeds the
/// provider's byte limit.
const PROVIDER_DOWNSCALE_MAX_DIM: u32 = 4096;
const PROVIDER_DOWNSCALE_QUALITY: u8 = 85;

#[derive(Debug, Error)]
enum IndexError {
    #[error("photo image is missing from storage")]
    ImageMissing,
    #[error("event row is missing")]
    EventMissing,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Database(#[from] database::Error),
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl IndexError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::ImageMissing | Self::EventMissing => ErrorKind::Terminal,
            Self::Provider(e) => e.kind(),
            Self::Database(_) => ErrorKind::Retryable,
            Self::Storage(e) => {
                if e.is_transient() {
                    ErrorKind::Retryable
                } else {
                    ErrorKind::Terminal
                }
            }
        }
    }

    /// Discriminator recorded on the photo row for user-facing surfaces.
    fn name(&self) -> String {
        match self {
            Self::ImageMissing => "NotFoundError".to_string(),
            Self::EventMissing => "EventNotFoundError".to_string(),
            Self::Provider(e) => e.name.clone(),
            Self::Database(_) => "DatabaseError".to_string(),
            Self::Storage(_) => "StorageError".to_string(),
        }
    }
}

/// Consume photo-indexing jobs in paced batches, fan the provider calls out
/// concurrently and persist detected faces.
pub async fn index_faces(app: Arc<App>) -> anyhow::Result<()> {
    info!("Starting face indexer.");

    loop {
        let jobs = app
            .database
            .claim_photo_jobs(
                app.config.indexing.batch_size,
                app.config.app.visibility_timeout,
            )
            .await?;

        if jobs.is_empty() {
            sleep(app.config.app.queue_poll_interval).await;
            continue;
        }

        process_batch(&app, &jobs).await?;
    }
}

#[instrument(level = "info", skip_all, fields(batch_size = jobs.len()))]
async fn process_batch(app: &Arc<App>, jobs: &[PhotoJob]) -> anyhow::Result<()> {
    TaskMonitor::log_batch_size(jobs.len());

    let reservation = app.rate_limiter.reserve_batch(jobs.len());
    sleep(reservation.delay).await;

    // All jobs run concurrently; each delays its own start so the provider
    // sees calls spaced at the reserved interval.
    let results = futures::future::join_all(jobs.iter().enumerate().map(|(i, job)| {
        let app = Arc::clone(app);
        let interval = reservation.interval;
        async move {
            sleep(interval * i as u32).await;
            process_job(&app, job).await
        }
    }))
    .await;

    // One pacing penalty per batch no matter how many calls were throttled.
    let throttled = results
        .iter()
        .any(|r| matches!(r, Err(e) if e.kind() == ErrorKind::Throttle));
    if throttled {
        app.rate_limiter
            .report_throttle(app.config.indexing.throttle_penalty);
    }

    for (job, result) in jobs.iter().zip(results) {
        match result {
            Ok(()) => app.database.ack_photo_job(job.id).await?,
            Err(err) => settle_failed_job(app, job, &err).await?,
        }
    }

    Ok(())
}

async fn settle_failed_job(app: &App, job: &PhotoJob, err: &IndexError) -> anyhow::Result<()> {
    let db = &app.database;
    let kind = err.kind();

    warn!(
        photo_id = %job.photo_id,
        attempts = job.attempts,
        error = %err,
        "Indexing failed"
    );

    if kind == ErrorKind::Terminal {
        annotate_photo(app, job, err, false).await;
        db.ack_photo_job(job.id).await?;
        return Ok(());
    }

    if job.attempts >= app.config.app.max_attempts {
        warn!(photo_id = %job.photo_id, "Indexing job exhausted its retries, dropping");
        annotate_photo(app, job, err, false).await;
        db.ack_photo_job(job.id).await?;
        return Ok(());
    }

    annotate_photo(app, job, err, true).await;
    let delay = delay_for(kind, job.attempts, &app.config.backoff);
    db.retry_photo_job(job.id, delay).await?;

    Ok(())
}

/// Record the failure on the photo row. Best effort: when the database
/// itself is the problem this will fail too, and the retry path already
/// covers it.
async fn annotate_photo(app: &App, job: &PhotoJob, err: &IndexError, retryable: bool) {
    if let Err(error) = app
        .database
        .mark_photo_failed(job.photo_id, &err.name(), retryable)
        .await
    {
        warn!(photo_id = %job.photo_id, %error, "Failed to annotate photo row");
    }
}

async fn process_job(app: &App, job: &PhotoJob) -> Result<(), IndexError> {
    let db = &app.database;

    // Settled photos make re-delivered jobs no-ops.
    let Some(photo) = db.get_photo(job.photo_id).await? else {
        return Err(IndexError::ImageMissing);
    };
    if photo.status == PhotoStatus::Indexed || photo.deleted_at.is_some() {
        return Ok(());
    }

    db.mark_photo_indexing(job.photo_id).await?;

    let bytes = app.storage.get(&job.r2_key).await.map_err(|e| match e {
        StorageError::NotFound { .. } => IndexError::ImageMissing,
        other => IndexError::Storage(other),
    })?;

    let bytes = if bytes.len() as u64 > app.config.indexing.provider_max_bytes {
        match media::downscale_for_provider(
            bytes.clone(),
            PROVIDER_DOWNSCALE_MAX_DIM,
            PROVIDER_DOWNSCALE_QUALITY,
        )
        .await
        {
            Ok(smaller) => smaller,
            Err(error) => {
                // The provider may still accept the original; let it decide.
                warn!(photo_id = %job.photo_id, %error, "Downscale failed, sending original bytes");
                bytes
            }
        }
    } else {
        bytes
    };

    let collection_id = ensure_collection(app, job).await?;

    let outcome = app
        .provider
        .index_faces(&collection_id, bytes, &job.photo_id.to_string())
        .await?;

    if outcome.unindexed > 0 {
        info!(
            photo_id = %job.photo_id,
            unindexed = outcome.unindexed,
            "Provider declined to index some faces"
        );
    }

    db.persist_index_result(job.photo_id, job.event_id, &outcome.faces)
        .await?;

    Ok(())
}

/// Create the event's collection on first use and remember it. Safe to race:
/// creation treats "already exists" as success and the first recorded id
/// wins.
async fn ensure_collection(app: &App, job: &PhotoJob) -> Result<String, IndexError> {
    let db = &app.database;

    let event = db
        .get_event(job.event_id)
        .await?
        .ok_or(IndexError::EventMissing)?;

    if let Some(collection_id) = event.collection_id {
        return Ok(collection_id);
    }

    let collection_id = job.event_id.to_string();
    app.provider.create_collection(&collection_id).await?;
    db.set_event_collection(job.event_id, &collection_id).await?;

    Ok(collection_id)
}
