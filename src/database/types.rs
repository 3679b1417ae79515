use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::provider::BoundingBox;

#[derive(Debug, Error)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

/// Lifecycle of a presign-time upload reservation.
///
/// Exactly one terminal transition happens per intent; `Completed` implies a
/// photo id is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Expired,
}

impl From<IntentStatus> for &str {
    fn from(status: IntentStatus) -> Self {
        match status {
            IntentStatus::Pending => "pending",
            IntentStatus::Processing => "processing",
            IntentStatus::Completed => "completed",
            IntentStatus::Failed => "failed",
            IntentStatus::Expired => "expired",
        }
    }
}

impl FromStr for IntentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "expired" => Ok(Self::Expired),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl IntentStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoStatus {
    Uploading,
    Indexing,
    Indexed,
    Failed,
}

impl From<PhotoStatus> for &str {
    fn from(status: PhotoStatus) -> Self {
        match status {
            PhotoStatus::Uploading => "uploading",
            PhotoStatus::Indexing => "indexing",
            PhotoStatus::Indexed => "indexed",
            PhotoStatus::Failed => "failed",
        }
    }
}

impl FromStr for PhotoStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(Self::Uploading),
            "indexing" => Ok(Self::Indexing),
            "indexed" => Ok(Self::Indexed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEntryType {
    Credit,
    Debit,
}

impl From<LedgerEntryType> for &str {
    fn from(entry_type: LedgerEntryType) -> Self {
        match entry_type {
            LedgerEntryType::Credit => "credit",
            LedgerEntryType::Debit => "debit",
        }
    }
}

impl FromStr for LedgerEntryType {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(Self::Credit),
            "debit" => Ok(Self::Debit),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadIntent {
    pub id: Uuid,
    pub photographer_id: Uuid,
    pub event_id: Uuid,
    pub r2_key: String,
    pub content_type: Option<String>,
    pub content_length: Option<i64>,
    pub status: IntentStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub retryable: Option<bool>,
    pub photo_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Photo {
    pub id: Uuid,
    pub event_id: Uuid,
    pub r2_key: String,
    pub status: PhotoStatus,
    pub face_count: Option<i32>,
    pub retryable: Option<bool>,
    pub error_name: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub file_size: Option<i64>,
    pub original_mime_type: Option<String>,
    pub original_file_size: Option<i64>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Column values for a freshly normalized photo row.
#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub id: Uuid,
    pub event_id: Uuid,
    pub r2_key: String,
    pub width: i32,
    pub height: i32,
    pub file_size: i64,
    pub original_mime_type: String,
    pub original_file_size: i64,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub id: Uuid,
    pub photographer_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub collection_id: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreditEntry {
    pub id: i64,
    pub photographer_id: Uuid,
    pub amount: i32,
    pub entry_type: LedgerEntryType,
    pub source: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredFace {
    pub id: Uuid,
    pub photo_id: Uuid,
    pub event_id: Uuid,
    pub provider_face_id: String,
    pub bounding_box: BoundingBox,
    pub confidence: f32,
    pub embedding: Option<Vec<f32>>,
}

/// An object-create notification waiting on the upload queue.
#[derive(Debug, Clone)]
pub struct UploadEventMessage {
    pub id: i64,
    pub action: String,
    pub bucket: String,
    pub object_key: String,
    pub object_size: i64,
    pub object_etag: Option<String>,
    pub event_time: DateTime<Utc>,
    pub attempts: i32,
}

/// A photo-indexing job waiting on the photo queue.
#[derive(Debug, Clone)]
pub struct PhotoJob {
    pub id: i64,
    pub photo_id: Uuid,
    pub event_id: Uuid,
    pub r2_key: String,
    pub attempts: i32,
}

/// An event-cleanup job waiting on the cleanup queue.
#[derive(Debug, Clone)]
pub struct CleanupJob {
    pub id: i64,
    pub event_id: Uuid,
    pub attempts: i32,
}
