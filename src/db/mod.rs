//! Database layer for tg-cloud-export
//!
//! Handles SQLite persistence for export checkpoints and processed-message
//! records.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`checkpoints`] - Per-channel export progress
//! - [`records`] - Append-only audit of uploaded attachments
//!
//! The exporter only ever sees the [`ExportStore`] trait, so tests (and
//! embedders with a different backend) can substitute their own store.

use crate::{Error, Result};
use crate::types::{
    ChannelId, ExportCheckpoint, MessageId, ProcessedMessageRecord, SourceKind,
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod checkpoints;
mod migrations;
mod records;

/// Store operations the exporter depends on
#[async_trait::async_trait]
pub trait ExportStore: Send + Sync {
    /// Checkpoint for `channel_id`, if one has ever been written
    async fn find_checkpoint(&self, channel_id: ChannelId) -> Result<Option<ExportCheckpoint>>;

    /// Create or advance the checkpoint; never moves it backwards
    async fn upsert_checkpoint(&self, checkpoint: &ExportCheckpoint) -> Result<()>;

    /// Append an audit record for an uploaded attachment
    async fn insert_processed_record(&self, record: &ProcessedMessageRecord) -> Result<()>;

    /// All checkpoints, for inspection
    async fn list_checkpoints(&self) -> Result<Vec<ExportCheckpoint>> {
        Err(Error::NotSupported(
            "this store does not support listing checkpoints".to_string(),
        ))
    }

    /// Processed records, most recent first, optionally for one channel
    async fn list_processed_records(
        &self,
        _channel_id: Option<ChannelId>,
        _limit: usize,
        _offset: usize,
    ) -> Result<Vec<ProcessedMessageRecord>> {
        Err(Error::NotSupported(
            "this store does not support querying records".to_string(),
        ))
    }

    /// Number of processed records, optionally for one channel
    async fn count_processed_records(&self, _channel_id: Option<ChannelId>) -> Result<i64> {
        Err(Error::NotSupported(
            "this store does not support querying records".to_string(),
        ))
    }
}

/// Checkpoint row from database
#[derive(Debug, Clone, FromRow)]
pub struct CheckpointRow {
    /// Channel id (primary key)
    pub channel_id: i64,
    /// Highest committed message id
    pub last_processed_message_id: i64,
    /// Unix timestamp of the last advance
    pub last_processed_at: i64,
    /// Channel title at the last advance
    pub channel_title: String,
}

impl From<CheckpointRow> for ExportCheckpoint {
    fn from(row: CheckpointRow) -> Self {
        Self {
            channel_id: ChannelId(row.channel_id),
            last_processed_message_id: MessageId(row.last_processed_message_id),
            last_processed_at: timestamp_to_utc(row.last_processed_at),
            channel_title: row.channel_title,
        }
    }
}

/// Processed-message row from database
#[derive(Debug, Clone, FromRow)]
pub struct ProcessedRecordRow {
    /// Unique database ID
    pub id: i64,
    /// Channel id
    pub channel_id: i64,
    /// Channel title
    pub channel_title: String,
    /// Message id
    pub message_id: i64,
    /// Uploaded filename
    pub file_name: String,
    /// Remote folder label
    pub cloud_path: String,
    /// Storage provider name
    pub cloud_provider: String,
    /// "listener" or "export"
    pub source_kind: String,
    /// Unix timestamp when the record was written
    pub created_at: i64,
}

impl From<ProcessedRecordRow> for ProcessedMessageRecord {
    fn from(row: ProcessedRecordRow) -> Self {
        Self {
            channel_id: ChannelId(row.channel_id),
            channel_title: row.channel_title,
            message_id: MessageId(row.message_id),
            file_name: row.file_name,
            cloud_path: row.cloud_path,
            cloud_provider: row.cloud_provider,
            source_kind: SourceKind::from_db(&row.source_kind),
            created_at: timestamp_to_utc(row.created_at),
        }
    }
}

fn timestamp_to_utc(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Database handle for tg-cloud-export
pub struct Database {
    pool: SqlitePool,
}

#[async_trait::async_trait]
impl ExportStore for Database {
    async fn find_checkpoint(&self, channel_id: ChannelId) -> Result<Option<ExportCheckpoint>> {
        self.get_checkpoint(channel_id).await
    }

    async fn upsert_checkpoint(&self, checkpoint: &ExportCheckpoint) -> Result<()> {
        self.advance_checkpoint(checkpoint).await
    }

    async fn insert_processed_record(&self, record: &ProcessedMessageRecord) -> Result<()> {
        self.insert_record(record).await.map(|_| ())
    }

    async fn list_checkpoints(&self) -> Result<Vec<ExportCheckpoint>> {
        Database::list_checkpoints(self).await
    }

    async fn list_processed_records(
        &self,
        channel_id: Option<ChannelId>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ProcessedMessageRecord>> {
        Database::list_processed_records(self, channel_id, limit, offset).await
    }

    async fn count_processed_records(&self, channel_id: Option<ChannelId>) -> Result<i64> {
        Database::count_processed_records(self, channel_id).await
    }
}
