use thiserror::Error as ThisError;
use tracing::instrument;
use uuid::Uuid;

use super::methods::DbMethods as _;
use super::types::{LedgerEntryType, NewPhoto};
use super::{Database, Error};
use crate::provider::FaceRecord;

/// Source tag on debit entries written by the upload pipeline.
const DEBIT_SOURCE: &str = "upload";

/// Outcome of [`Database::complete_upload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteUpload {
    /// The debit, photo row and indexing job were committed.
    Committed,
    /// A concurrent delivery settled the intent first; nothing was written.
    AlreadySettled,
}

#[derive(Debug, ThisError)]
pub enum CompleteUploadError {
    /// The photographer's unexpired balance is below one credit; nothing was
    /// written.
    #[error("insufficient credits")]
    InsufficientCredits,
    #[error(transparent)]
    Database(#[from] Error),
}

impl From<sqlx::Error> for CompleteUploadError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.into())
    }
}

/// impl block for composite database transactions
impl Database {
    /// Atomically debit one credit and persist the freshly normalized photo.
    ///
    /// Holds a row lock on the photographer for the whole body, so balance
    /// checks and FIFO consumption are serialized per photographer. The
    /// intent transition doubles as the idempotency guard: deliveries of
    /// the same notification race on it, and a loser rolls back without
    /// charging the photographer a second time. For the winner the debit
    /// inherits the expiration of the oldest unexpired credit, the photo
    /// row is created in `uploading`, and the indexing job lands on the
    /// photo queue -- or none of it happens.
    #[instrument(skip(self, photo), level = "debug")]
    pub async fn complete_upload(
        &self,
        intent_id: Uuid,
        photographer_id: Uuid,
        photo: &NewPhoto,
    ) -> Result<CompleteUpload, CompleteUploadError> {
        let mut tx = self.pool.begin().await?;

        let photographer_exists = (&mut *tx).lock_photographer(photographer_id).await?;
        if !photographer_exists {
            tx.rollback().await?;
            return Err(CompleteUploadError::InsufficientCredits);
        }

        // Competing deliveries queue up on the intent's row lock here; once
        // the first one commits, the guarded update matches zero rows for
        // everyone else.
        let completed = (&mut *tx).mark_intent_completed(intent_id, photo.id).await?;
        if completed == 0 {
            tx.rollback().await?;
            return Ok(CompleteUpload::AlreadySettled);
        }

        let balance = (&mut *tx).photographer_balance(photographer_id).await?;
        if balance < 1 {
            tx.rollback().await?;
            return Err(CompleteUploadError::InsufficientCredits);
        }

        // A positive balance implies at least one positive unexpired entry.
        let Some(oldest_credit) = (&mut *tx).oldest_unexpired_credit(photographer_id).await?
        else {
            tx.rollback().await?;
            return Err(CompleteUploadError::InsufficientCredits);
        };

        (&mut *tx)
            .insert_ledger_entry(
                photographer_id,
                -1,
                LedgerEntryType::Debit,
                DEBIT_SOURCE,
                oldest_credit.expires_at,
            )
            .await?;

        (&mut *tx).insert_photo(photo).await?;
        (&mut *tx)
            .enqueue_photo_job(photo.id, photo.event_id, &photo.r2_key)
            .await?;

        tx.commit().await?;

        Ok(CompleteUpload::Committed)
    }

    /// Atomically persist detected faces and flip the photo to `indexed`.
    ///
    /// Re-execution converges: faces for the photo are replaced, not
    /// appended, and the status flip is unconditional. A failed commit
    /// surfaces to the caller, which retries the whole message with
    /// backoff.
    #[instrument(skip(self, faces), level = "debug")]
    pub async fn persist_index_result(
        &self,
        photo_id: Uuid,
        event_id: Uuid,
        faces: &[FaceRecord],
    ) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        // Serialize against any other writer of this photo row.
        sqlx::query("SELECT id FROM photos WHERE id = $1 FOR UPDATE")
            .bind(photo_id)
            .fetch_optional(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM faces WHERE photo_id = $1")
            .bind(photo_id)
            .execute(&mut *tx)
            .await?;

        for record in faces {
            (&mut *tx).insert_face(photo_id, event_id, record).await?;
        }

        (&mut *tx)
            .mark_photo_indexed(photo_id, faces.len() as i32)
            .await?;

        tx.commit().await?;

        Ok(())
    }
}
