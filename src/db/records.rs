//! Processed-message audit records.

use crate::types::{ChannelId, ProcessedMessageRecord};
use crate::{Error, Result};

use super::{Database, ProcessedRecordRow};

impl Database {
    /// Append a processed-message record, returning its row id
    pub async fn insert_record(&self, record: &ProcessedMessageRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_messages (
                channel_id, channel_title, message_id, file_name,
                cloud_path, cloud_provider, source_kind, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.channel_id)
        .bind(&record.channel_title)
        .bind(record.message_id)
        .bind(&record.file_name)
        .bind(&record.cloud_path)
        .bind(&record.cloud_provider)
        .bind(record.source_kind.as_str())
        .bind(record.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(result.last_insert_rowid())
    }

    /// Query records with pagination and optional channel filter
    ///
    /// Most recent first.
    pub async fn list_processed_records(
        &self,
        channel_id: Option<ChannelId>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ProcessedMessageRecord>> {
        let query = if let Some(channel_id) = channel_id {
            sqlx::query_as::<_, ProcessedRecordRow>(
                r#"
                SELECT id, channel_id, channel_title, message_id, file_name,
                       cloud_path, cloud_provider, source_kind, created_at
                FROM processed_messages
                WHERE channel_id = ?
                ORDER BY id DESC
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(channel_id)
            .bind(limit as i64)
            .bind(offset as i64)
        } else {
            sqlx::query_as::<_, ProcessedRecordRow>(
                r#"
                SELECT id, channel_id, channel_title, message_id, file_name,
                       cloud_path, cloud_provider, source_kind, created_at
                FROM processed_messages
                ORDER BY id DESC
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(limit as i64)
            .bind(offset as i64)
        };

        let rows = query.fetch_all(&self.pool).await.map_err(Error::Sqlx)?;

        Ok(rows.into_iter().map(ProcessedMessageRecord::from).collect())
    }

    /// Count records (optionally for one channel)
    pub async fn count_processed_records(&self, channel_id: Option<ChannelId>) -> Result<i64> {
        let count = if let Some(channel_id) = channel_id {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM processed_messages WHERE channel_id = ?",
            )
            .bind(channel_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)?
        } else {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM processed_messages")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Sqlx)?
        };

        Ok(count)
    }
}
