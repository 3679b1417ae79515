use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Acquire, Postgres, Row};
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use super::types::{
    CleanupJob, CreditEntry, Event, IntentStatus, LedgerEntryType, NewPhoto, Photo, PhotoJob,
    PhotoStatus, StoredFace, UploadEventMessage, UploadIntent,
};
use super::Error;
use crate::provider::{BoundingBox, FaceRecord};

/// This trait provides the individual and composable queries to the
/// database. Each method is a single atomic query and can be composed
/// within a transaction.
#[async_trait]
pub trait DbMethods<'c>: Acquire<'c, Database = Postgres> + Send + Sized {
    // ---- upload intents ----

    async fn get_intent_by_key(self, r2_key: &str) -> Result<Option<UploadIntent>, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            r#"
            SELECT id, photographer_id, event_id, r2_key, content_type, content_length,
                   status, error_code, error_message, retryable, photo_id,
                   expires_at, completed_at, created_at
            FROM upload_intents
            WHERE r2_key = $1
            "#,
        )
        .bind(r2_key)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|r| intent_from_row(&r)))
    }

    /// Record presign issuance. Owned by the account subsystem; exposed here
    /// for tests and tooling.
    async fn insert_upload_intent(
        self,
        id: Uuid,
        photographer_id: Uuid,
        event_id: Uuid,
        r2_key: &str,
        content_type: Option<&str>,
        content_length: Option<i64>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query(
            r#"
            INSERT INTO upload_intents
                (id, photographer_id, event_id, r2_key, content_type, content_length,
                 status, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id)
        .bind(photographer_id)
        .bind(event_id)
        .bind(r2_key)
        .bind(content_type)
        .bind(content_length)
        .bind(<&str>::from(IntentStatus::Pending))
        .bind(expires_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Complete an intent, pointing it at its photo. Returns the number of
    /// rows moved: zero means another delivery settled the intent first,
    /// and the caller must not commit any work for it.
    #[instrument(skip(self), level = "debug")]
    async fn mark_intent_completed(self, id: Uuid, photo_id: Uuid) -> Result<u64, Error> {
        let mut conn = self.acquire().await?;

        // A failed-but-retryable intent may still complete on a later
        // delivery; hard-terminal states never move again.
        let result = sqlx::query(
            r#"
            UPDATE upload_intents
            SET    status = $2, photo_id = $3, completed_at = CURRENT_TIMESTAMP,
                   error_code = NULL, error_message = NULL, retryable = NULL
            WHERE  id = $1
            AND    (status IN ($4, $5) OR (status = $6 AND retryable))
            "#,
        )
        .bind(id)
        .bind(<&str>::from(IntentStatus::Completed))
        .bind(photo_id)
        .bind(<&str>::from(IntentStatus::Pending))
        .bind(<&str>::from(IntentStatus::Processing))
        .bind(<&str>::from(IntentStatus::Failed))
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), level = "debug")]
    async fn mark_intent_failed(
        self,
        id: Uuid,
        error_code: &str,
        error_message: &str,
        retryable: bool,
    ) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query(
            r#"
            UPDATE upload_intents
            SET    status = $2, error_code = $3, error_message = $4, retryable = $5
            WHERE  id = $1
            AND    (status IN ($6, $7) OR (status = $2 AND retryable))
            "#,
        )
        .bind(id)
        .bind(<&str>::from(IntentStatus::Failed))
        .bind(error_code)
        .bind(error_message)
        .bind(retryable)
        .bind(<&str>::from(IntentStatus::Pending))
        .bind(<&str>::from(IntentStatus::Processing))
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn mark_intent_expired(self, id: Uuid) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query(
            r#"
            UPDATE upload_intents
            SET    status = $2
            WHERE  id = $1
            AND    status IN ($3, $4)
            "#,
        )
        .bind(id)
        .bind(<&str>::from(IntentStatus::Expired))
        .bind(<&str>::from(IntentStatus::Pending))
        .bind(<&str>::from(IntentStatus::Processing))
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Expire pending intents whose reservation window has passed. Returns
    /// the number of reaped rows.
    async fn expire_stale_intents(self, limit: i64) -> Result<u64, Error> {
        let mut conn = self.acquire().await?;

        let result = sqlx::query(
            r#"
            UPDATE upload_intents
            SET    status = $2
            WHERE  id IN (
                SELECT id FROM upload_intents
                WHERE  status = $3
                AND    expires_at < CURRENT_TIMESTAMP
                LIMIT  $1
            )
            "#,
        )
        .bind(limit)
        .bind(<&str>::from(IntentStatus::Expired))
        .bind(<&str>::from(IntentStatus::Pending))
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    // ---- photos ----

    async fn insert_photo(self, photo: &NewPhoto) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query(
            r#"
            INSERT INTO photos
                (id, event_id, r2_key, status, width, height, file_size,
                 original_mime_type, original_file_size)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(photo.id)
        .bind(photo.event_id)
        .bind(&photo.r2_key)
        .bind(<&str>::from(PhotoStatus::Uploading))
        .bind(photo.width)
        .bind(photo.height)
        .bind(photo.file_size)
        .bind(&photo.original_mime_type)
        .bind(photo.original_file_size)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn get_photo(self, id: Uuid) -> Result<Option<Photo>, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            r#"
            SELECT id, event_id, r2_key, status, face_count, retryable, error_name,
                   width, height, file_size, original_mime_type, original_file_size,
                   indexed_at, deleted_at, created_at
            FROM photos
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|r| photo_from_row(&r)))
    }

    async fn mark_photo_indexing(self, id: Uuid) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query(
            r#"
            UPDATE photos
            SET    status = $2
            WHERE  id = $1
            AND    status = $3
            "#,
        )
        .bind(id)
        .bind(<&str>::from(PhotoStatus::Indexing))
        .bind(<&str>::from(PhotoStatus::Uploading))
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Flip a photo to `indexed`. Composed with face inserts inside one
    /// transaction.
    async fn mark_photo_indexed(self, id: Uuid, face_count: i32) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query(
            r#"
            UPDATE photos
            SET    status = $2, face_count = $3, indexed_at = CURRENT_TIMESTAMP,
                   retryable = NULL, error_name = NULL
            WHERE  id = $1
            "#,
        )
        .bind(id)
        .bind(<&str>::from(PhotoStatus::Indexed))
        .bind(face_count)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn mark_photo_failed(
        self,
        id: Uuid,
        error_name: &str,
        retryable: bool,
    ) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        // A retryable failure only annotates the row; a terminal one also
        // moves the status so indexed photos never regress.
        let status = if retryable {
            None
        } else {
            Some(<&str>::from(PhotoStatus::Failed))
        };

        sqlx::query(
            r#"
            UPDATE photos
            SET    status = COALESCE($2, status), error_name = $3, retryable = $4
            WHERE  id = $1
            AND    status <> $5
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(error_name)
        .bind(retryable)
        .bind(<&str>::from(PhotoStatus::Indexed))
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn has_undeleted_photos(self, event_id: Uuid) -> Result<bool, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM photos WHERE event_id = $1 AND deleted_at IS NULL
            )
            "#,
        )
        .bind(event_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(row.get::<bool, _>(0))
    }

    /// Soft-delete every live photo of an event. Returns the number of rows
    /// touched; already-deleted rows keep their original timestamp.
    async fn soft_delete_event_photos(self, event_id: Uuid) -> Result<u64, Error> {
        let mut conn = self.acquire().await?;

        let result = sqlx::query(
            r#"
            UPDATE photos
            SET    deleted_at = CURRENT_TIMESTAMP
            WHERE  event_id = $1
            AND    deleted_at IS NULL
            "#,
        )
        .bind(event_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    // ---- faces ----

    async fn insert_face(
        self,
        photo_id: Uuid,
        event_id: Uuid,
        record: &FaceRecord,
    ) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query(
            r#"
            INSERT INTO faces
                (id, photo_id, event_id, provider_face_id, bounding_box, confidence, embedding)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(photo_id)
        .bind(event_id)
        .bind(&record.provider_face_id)
        .bind(Json(&record.bounding_box))
        .bind(record.confidence)
        .bind(record.embedding.as_deref())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn get_faces_for_photo(self, photo_id: Uuid) -> Result<Vec<StoredFace>, Error> {
        let mut conn = self.acquire().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, photo_id, event_id, provider_face_id, bounding_box, confidence, embedding
            FROM faces
            WHERE photo_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(photo_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| StoredFace {
                id: row.get(0),
                photo_id: row.get(1),
                event_id: row.get(2),
                provider_face_id: row.get(3),
                bounding_box: row.get::<Json<BoundingBox>, _>(4).0,
                confidence: row.get(5),
                embedding: row.get(6),
            })
            .collect())
    }

    // ---- events & photographers ----

    async fn insert_photographer(self, id: Uuid) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query("INSERT INTO photographers (id) VALUES ($1)")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    async fn insert_event(
        self,
        id: Uuid,
        photographer_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query(
            r#"
            INSERT INTO events (id, photographer_id, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(id)
        .bind(photographer_id)
        .bind(expires_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn get_event(self, id: Uuid) -> Result<Option<Event>, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            r#"
            SELECT id, photographer_id, expires_at, collection_id, deleted_at, created_at
            FROM events
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|r| event_from_row(&r)))
    }

    /// Remember the provider-side collection backing an event. Idempotent:
    /// re-recording the same value is a no-op, a conflicting value is
    /// ignored in favor of the first writer.
    async fn set_event_collection(self, id: Uuid, collection_id: &str) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query(
            r#"
            UPDATE events
            SET    collection_id = $2
            WHERE  id = $1
            AND    collection_id IS NULL
            "#,
        )
        .bind(id)
        .bind(collection_id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn clear_event_collection(self, id: Uuid) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query("UPDATE events SET collection_id = NULL WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Events old enough to reap: past retention, expired, and still holding
    /// a provider-side collection.
    async fn get_expired_events(
        self,
        retention_days: i32,
        limit: i64,
    ) -> Result<Vec<Event>, Error> {
        let mut conn = self.acquire().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, photographer_id, expires_at, collection_id, deleted_at, created_at
            FROM events
            WHERE created_at < CURRENT_TIMESTAMP - make_interval(days => $1)
            AND   expires_at < CURRENT_TIMESTAMP
            AND   collection_id IS NOT NULL
            ORDER BY expires_at
            LIMIT $2
            "#,
        )
        .bind(retention_days)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows.iter().map(event_from_row).collect())
    }

    // ---- credit ledger ----

    /// Take the row lock serializing all credit movements for one
    /// photographer. Returns false when the photographer does not exist.
    async fn lock_photographer(self, id: Uuid) -> Result<bool, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query("SELECT id FROM photographers WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.is_some())
    }

    /// Effective balance: the sum over unexpired entries.
    async fn photographer_balance(self, id: Uuid) -> Result<i64, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount), 0)::BIGINT
            FROM credit_ledger
            WHERE photographer_id = $1
            AND   expires_at > CURRENT_TIMESTAMP
            "#,
        )
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(row.get::<i64, _>(0))
    }

    /// The positive entry expiring soonest; FIFO expiration consumes this
    /// one first.
    async fn oldest_unexpired_credit(self, id: Uuid) -> Result<Option<CreditEntry>, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query(
            r#"
            SELECT id, photographer_id, amount, entry_type, source, expires_at, created_at
            FROM credit_ledger
            WHERE photographer_id = $1
            AND   amount > 0
            AND   expires_at > CURRENT_TIMESTAMP
            ORDER BY expires_at ASC
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(|r| credit_from_row(&r)))
    }

    async fn insert_ledger_entry(
        self,
        photographer_id: Uuid,
        amount: i32,
        entry_type: LedgerEntryType,
        source: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query(
            r#"
            INSERT INTO credit_ledger (photographer_id, amount, entry_type, source, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(photographer_id)
        .bind(amount)
        .bind(<&str>::from(entry_type))
        .bind(source)
        .bind(expires_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    // ---- upload-event queue ----

    async fn enqueue_upload_event(
        self,
        action: &str,
        bucket: &str,
        object_key: &str,
        object_size: i64,
        object_etag: Option<&str>,
        event_time: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query(
            r#"
            INSERT INTO upload_events (action, bucket, object_key, object_size, object_etag, event_time)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(action)
        .bind(bucket)
        .bind(object_key)
        .bind(object_size)
        .bind(object_etag)
        .bind(event_time)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Claim up to `limit` due notifications, hiding them for `visibility`.
    /// The bumped attempts counter is reflected in the returned messages.
    async fn claim_upload_events(
        self,
        limit: i64,
        visibility: Duration,
    ) -> Result<Vec<UploadEventMessage>, Error> {
        let mut conn = self.acquire().await?;

        let rows = sqlx::query(
            r#"
            UPDATE upload_events
            SET    attempts = attempts + 1,
                   available_at = CURRENT_TIMESTAMP + make_interval(secs => $2)
            WHERE  id IN (
                SELECT id FROM upload_events
                WHERE  available_at <= CURRENT_TIMESTAMP
                ORDER BY id
                LIMIT  $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, action, bucket, object_key, object_size, object_etag, event_time, attempts
            "#,
        )
        .bind(limit)
        .bind(visibility.as_secs_f64())
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| UploadEventMessage {
                id: row.get(0),
                action: row.get(1),
                bucket: row.get(2),
                object_key: row.get(3),
                object_size: row.get(4),
                object_etag: row.get(5),
                event_time: row.get(6),
                attempts: row.get(7),
            })
            .collect())
    }

    async fn ack_upload_event(self, id: i64) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query("DELETE FROM upload_events WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    async fn retry_upload_event(self, id: i64, delay: Duration) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query(
            r#"
            UPDATE upload_events
            SET    available_at = CURRENT_TIMESTAMP + make_interval(secs => $2)
            WHERE  id = $1
            "#,
        )
        .bind(id)
        .bind(delay.as_secs_f64())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn count_upload_events(self) -> Result<i64, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query("SELECT COUNT(*) FROM upload_events")
            .fetch_one(&mut *conn)
            .await?;

        Ok(row.get::<i64, _>(0))
    }

    // ---- photo-job queue ----

    async fn enqueue_photo_job(
        self,
        photo_id: Uuid,
        event_id: Uuid,
        r2_key: &str,
    ) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query(
            r#"
            INSERT INTO photo_jobs (photo_id, event_id, r2_key)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(photo_id)
        .bind(event_id)
        .bind(r2_key)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn claim_photo_jobs(
        self,
        limit: i64,
        visibility: Duration,
    ) -> Result<Vec<PhotoJob>, Error> {
        let mut conn = self.acquire().await?;

        let rows = sqlx::query(
            r#"
            UPDATE photo_jobs
            SET    attempts = attempts + 1,
                   available_at = CURRENT_TIMESTAMP + make_interval(secs => $2)
            WHERE  id IN (
                SELECT id FROM photo_jobs
                WHERE  available_at <= CURRENT_TIMESTAMP
                ORDER BY id
                LIMIT  $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, photo_id, event_id, r2_key, attempts
            "#,
        )
        .bind(limit)
        .bind(visibility.as_secs_f64())
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| PhotoJob {
                id: row.get(0),
                photo_id: row.get(1),
                event_id: row.get(2),
                r2_key: row.get(3),
                attempts: row.get(4),
            })
            .collect())
    }

    async fn ack_photo_job(self, id: i64) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query("DELETE FROM photo_jobs WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    async fn retry_photo_job(self, id: i64, delay: Duration) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query(
            r#"
            UPDATE photo_jobs
            SET    available_at = CURRENT_TIMESTAMP + make_interval(secs => $2)
            WHERE  id = $1
            "#,
        )
        .bind(id)
        .bind(delay.as_secs_f64())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn count_photo_jobs(self) -> Result<i64, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query("SELECT COUNT(*) FROM photo_jobs")
            .fetch_one(&mut *conn)
            .await?;

        Ok(row.get::<i64, _>(0))
    }

    // ---- cleanup-job queue ----

    /// Enqueue a cleanup for an event. Duplicate enqueues collapse into the
    /// pending job.
    async fn enqueue_cleanup_job(self, event_id: Uuid) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query(
            r#"
            INSERT INTO cleanup_jobs (event_id)
            VALUES ($1)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn claim_cleanup_jobs(
        self,
        limit: i64,
        visibility: Duration,
    ) -> Result<Vec<CleanupJob>, Error> {
        let mut conn = self.acquire().await?;

        let rows = sqlx::query(
            r#"
            UPDATE cleanup_jobs
            SET    attempts = attempts + 1,
                   available_at = CURRENT_TIMESTAMP + make_interval(secs => $2)
            WHERE  id IN (
                SELECT id FROM cleanup_jobs
                WHERE  available_at <= CURRENT_TIMESTAMP
                ORDER BY id
                LIMIT  $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, event_id, attempts
            "#,
        )
        .bind(limit)
        .bind(visibility.as_secs_f64())
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| CleanupJob {
                id: row.get(0),
                event_id: row.get(1),
                attempts: row.get(2),
            })
            .collect())
    }

    async fn ack_cleanup_job(self, id: i64) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query("DELETE FROM cleanup_jobs WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    async fn retry_cleanup_job(self, id: i64, delay: Duration) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        sqlx::query(
            r#"
            UPDATE cleanup_jobs
            SET    available_at = CURRENT_TIMESTAMP + make_interval(secs => $2)
            WHERE  id = $1
            "#,
        )
        .bind(id)
        .bind(delay.as_secs_f64())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn count_cleanup_jobs(self) -> Result<i64, Error> {
        let mut conn = self.acquire().await?;

        let row = sqlx::query("SELECT COUNT(*) FROM cleanup_jobs")
            .fetch_one(&mut *conn)
            .await?;

        Ok(row.get::<i64, _>(0))
    }
}

impl<'c, T> DbMethods<'c> for T where T: Acquire<'c, Database = Postgres> + Send + Sized {}

fn intent_from_row(row: &PgRow) -> UploadIntent {
    UploadIntent {
        id: row.get(0),
        photographer_id: row.get(1),
        event_id: row.get(2),
        r2_key: row.get(3),
        content_type: row.get(4),
        content_length: row.get(5),
        status: row
            .get::<&str, _>(6)
            .parse()
            .expect("intent status is unreadable, database is corrupt"),
        error_code: row.get(7),
        error_message: row.get(8),
        retryable: row.get(9),
        photo_id: row.get(10),
        expires_at: row.get(11),
        completed_at: row.get(12),
        created_at: row.get(13),
    }
}

fn photo_from_row(row: &PgRow) -> Photo {
    Photo {
        id: row.get(0),
        event_id: row.get(1),
        r2_key: row.get(2),
        status: row
            .get::<&str, _>(3)
            .parse()
            .expect("photo status is unreadable, database is corrupt"),
        face_count: row.get(4),
        retryable: row.get(5),
        error_name: row.get(6),
        width: row.get(7),
        height: row.get(8),
        file_size: row.get(9),
        original_mime_type: row.get(10),
        original_file_size: row.get(11),
        indexed_at: row.get(12),
        deleted_at: row.get(13),
        created_at: row.get(14),
    }
}

fn event_from_row(row: &PgRow) -> Event {
    Event {
        id: row.get(0),
        photographer_id: row.get(1),
        expires_at: row.get(2),
        collection_id: row.get(3),
        deleted_at: row.get(4),
        created_at: row.get(5),
    }
}

fn credit_from_row(row: &PgRow) -> CreditEntry {
    CreditEntry {
        id: row.get(0),
        photographer_id: row.get(1),
        amount: row.get(2),
        entry_type: row
            .get::<&str, _>(3)
            .parse()
            .expect("ledger entry type is unreadable, database is corrupt"),
        source: row.get(4),
        expires_at: row.get(5),
        created_at: row.get(6),
    }
}
