//! Per-channel export checkpoints.

use crate::error::DatabaseError;
use crate::types::{ChannelId, ExportCheckpoint};
use crate::{Error, Result};

use super::{CheckpointRow, Database};

impl Database {
    /// Get the checkpoint for a channel
    pub async fn get_checkpoint(&self, channel_id: ChannelId) -> Result<Option<ExportCheckpoint>> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            r#"
            SELECT channel_id, last_processed_message_id, last_processed_at, channel_title
            FROM export_checkpoints
            WHERE channel_id = ?
            "#,
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get checkpoint: {}",
                e
            )))
        })?;

        Ok(row.map(ExportCheckpoint::from))
    }

    /// Create or advance a channel's checkpoint
    ///
    /// The stored message id becomes `MAX(stored, new)`, so a stale writer can
    /// never move a checkpoint backwards. Timestamp and title only follow a
    /// write that does not regress the id.
    pub async fn advance_checkpoint(&self, checkpoint: &ExportCheckpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO export_checkpoints (
                channel_id, last_processed_message_id, last_processed_at, channel_title
            )
            VALUES (?, ?, ?, ?)
            ON CONFLICT(channel_id) DO UPDATE SET
                last_processed_message_id =
                    MAX(last_processed_message_id, excluded.last_processed_message_id),
                last_processed_at = CASE
                    WHEN excluded.last_processed_message_id >= last_processed_message_id
                    THEN excluded.last_processed_at ELSE last_processed_at END,
                channel_title = CASE
                    WHEN excluded.last_processed_message_id >= last_processed_message_id
                    THEN excluded.channel_title ELSE channel_title END
            "#,
        )
        .bind(checkpoint.channel_id)
        .bind(checkpoint.last_processed_message_id)
        .bind(checkpoint.last_processed_at.timestamp())
        .bind(&checkpoint.channel_title)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert checkpoint: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// All checkpoints, ordered by channel title
    pub async fn list_checkpoints(&self) -> Result<Vec<ExportCheckpoint>> {
        let rows = sqlx::query_as::<_, CheckpointRow>(
            r#"
            SELECT channel_id, last_processed_message_id, last_processed_at, channel_title
            FROM export_checkpoints
            ORDER BY channel_title ASC, channel_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(rows.into_iter().map(ExportCheckpoint::from).collect())
    }
}
