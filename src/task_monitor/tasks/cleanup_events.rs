use std::sync::Arc;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::app::App;
use crate::database::methods::DbMethods as _;
use crate::database;
use crate::provider::ProviderError;
use crate::retry::{delay_for, ErrorKind};

/// Stale pending intents reaped per scan pass.
const INTENT_REAP_LIMIT: i64 = 1000;

#[derive(Debug, Error)]
enum CleanupError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Database(#[from] database::Error),
}

impl CleanupError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider(e) => e.kind(),
            Self::Database(_) => ErrorKind::Retryable,
        }
    }
}

/// What the reconciler still has to do for an event, derived from current
/// state so a rerun derives an empty plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CleanupAction {
    SoftDeletePhotos,
    DeleteCollection,
    ClearCollection,
}

fn derive_actions(has_undeleted_photos: bool, collection_id: Option<&str>) -> Vec<CleanupAction> {
    let mut actions = Vec::new();

    if has_undeleted_photos {
        actions.push(CleanupAction::SoftDeletePhotos);
    }
    if collection_id.is_some() {
        actions.push(CleanupAction::DeleteCollection);
        actions.push(CleanupAction::ClearCollection);
    }

    actions
}

/// Periodic scan: enqueue cleanup for events past retention and reap upload
/// intents whose reservation window lapsed.
pub async fn scan_expired_events(app: Arc<App>) -> anyhow::Result<()> {
    info!("Starting cleanup scanner.");

    loop {
        let events = app
            .database
            .get_expired_events(
                app.config.cleanup.retention_days,
                app.config.cleanup.batch_size,
            )
            .await?;

        if !events.is_empty() {
            info!(count = events.len(), "Enqueueing expired events for cleanup");
        }
        for event in &events {
            app.database.enqueue_cleanup_job(event.id).await?;
        }

        let reaped = app.database.expire_stale_intents(INTENT_REAP_LIMIT).await?;
        if reaped > 0 {
            info!(reaped, "Expired stale upload intents");
        }

        sleep(app.config.cleanup.scan_interval).await;
    }
}

/// Queue consumer tearing expired events down: soft-delete photos, drop the
/// provider-side collection, clear the event's reference to it.
pub async fn cleanup_events(app: Arc<App>) -> anyhow::Result<()> {
    info!("Starting cleanup processor.");

    loop {
        let jobs = app
            .database
            .claim_cleanup_jobs(
                app.config.cleanup.batch_size,
                app.config.app.visibility_timeout,
            )
            .await?;

        if jobs.is_empty() {
            sleep(app.config.app.queue_poll_interval).await;
            continue;
        }

        for job in jobs {
            match reconcile_event(&app, job.event_id).await {
                Ok(()) => {
                    app.database.ack_cleanup_job(job.id).await?;
                }
                Err(err) if err.kind().is_retryable() && job.attempts < app.config.app.max_attempts => {
                    warn!(event_id = %job.event_id, error = %err, "Cleanup failed, will retry");
                    let delay = delay_for(err.kind(), job.attempts, &app.config.backoff);
                    app.database.retry_cleanup_job(job.id, delay).await?;
                }
                Err(err) => {
                    warn!(event_id = %job.event_id, error = %err, "Cleanup failed terminally, dropping");
                    app.database.ack_cleanup_job(job.id).await?;
                }
            }
        }
    }
}

/// State-driven and idempotent: a second run right after a successful one
/// observes nothing left to do.
#[instrument(level = "info", skip(app))]
async fn reconcile_event(app: &App, event_id: Uuid) -> Result<(), CleanupError> {
    let db = &app.database;

    let Some(event) = db.get_event(event_id).await? else {
        // The event row is gone entirely; nothing left to reconcile.
        return Ok(());
    };

    let has_undeleted_photos = db.has_undeleted_photos(event_id).await?;
    let actions = derive_actions(has_undeleted_photos, event.collection_id.as_deref());

    for action in actions {
        match action {
            CleanupAction::SoftDeletePhotos => {
                let count = db.soft_delete_event_photos(event_id).await?;
                info!(%event_id, count, "Soft-deleted photos");
            }
            CleanupAction::DeleteCollection => {
                // The stored value is authoritative, whatever it is.
                let collection_id = event.collection_id.as_deref().unwrap();
                let deleted = app.provider.delete_collection(collection_id).await?;
                if !deleted {
                    info!(%event_id, collection_id, "Collection was already deleted");
                }
            }
            CleanupAction::ClearCollection => {
                db.clear_event_collection(event_id).await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_teardown_plan() {
        let actions = derive_actions(true, Some("evt"));
        assert_eq!(
            actions,
            vec![
                CleanupAction::SoftDeletePhotos,
                CleanupAction::DeleteCollection,
                CleanupAction::ClearCollection,
            ]
        );
    }

    #[test]
    fn photos_already_deleted() {
        let actions = derive_actions(false, Some("evt"));
        assert_eq!(
            actions,
            vec![
                CleanupAction::DeleteCollection,
                CleanupAction::ClearCollection,
            ]
        );
    }

    #[test]
    fn collection_already_cleared() {
        let actions = derive_actions(true, None);
        assert_eq!(actions, vec![CleanupAction::SoftDeletePhotos]);
    }

    #[test]
    fn nothing_left_to_do() {
        assert!(derive_actions(false, None).is_empty());
    }
}
