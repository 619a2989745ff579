//! Single-message pipeline: classify, then download → upload → record under retry.

use std::path::{Path, PathBuf};

use crate::classifier::{ChannelRule, Classification, classify};
use crate::error::{Error, FailureKind};
use crate::retry::{IsRetryable, RetryAction, RetryClass, run_with_backoff};
use crate::types::{
    Channel, Event, MessageRef, Outcome, ProcessedMessageRecord, SourceKind, wait_secs,
};

use super::Exporter;

/// Error from one pipeline stage, tagged with the stage that failed
#[derive(Debug)]
struct StageError {
    kind: FailureKind,
    error: Error,
}

impl StageError {
    fn new(kind: FailureKind, error: impl Into<Error>) -> Self {
        Self {
            kind,
            error: error.into(),
        }
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} stage: {}", self.kind, self.error)
    }
}

impl IsRetryable for StageError {
    fn retry_class(&self) -> RetryClass {
        self.error.retry_class()
    }
}

impl Exporter {
    /// Run one message through the pipeline until it reaches a terminal outcome.
    ///
    /// Policy skips return immediately. Throttle signals from any stage are
    /// waited out and the message is retried from the download step; other
    /// failures are terminal after the configured transient budget (zero by
    /// default). Only the calling task waits.
    pub async fn process_with_retry(
        &self,
        channel: &Channel,
        message: &MessageRef,
        rule: &ChannelRule,
        source_kind: SourceKind,
    ) -> Outcome {
        let file_name = match classify(message, rule, &self.policy) {
            Classification::Keep(name) => name,
            Classification::Skip(reason) => {
                tracing::debug!(
                    channel_id = channel.id.0,
                    message_id = message.message_id.0,
                    reason = %reason,
                    "Skipping message"
                );
                self.emit_event(Event::MessageSkipped {
                    channel_id: channel.id,
                    message_id: message.message_id,
                    reason,
                });
                return Outcome::SkippedByPolicy { reason };
            }
        };

        let on_retry = |_: &StageError, action: &RetryAction| {
            if let RetryAction::WaitThrottle(wait) = action {
                self.emit_event(Event::Throttled {
                    channel_id: channel.id,
                    message_id: Some(message.message_id),
                    wait_secs: wait_secs(*wait),
                });
            }
        };

        let name: &str = &file_name;
        let result = run_with_backoff(&self.config.retry, on_retry, || {
            self.process_once(channel, message, name, source_kind)
        })
        .await;

        match result {
            Ok(()) => {
                tracing::info!(
                    channel_id = channel.id.0,
                    message_id = message.message_id.0,
                    file_name = %file_name,
                    source = source_kind.as_str(),
                    "Attachment uploaded"
                );
                self.emit_event(Event::MessageUploaded {
                    channel_id: channel.id,
                    message_id: message.message_id,
                    file_name: file_name.clone(),
                    source: source_kind,
                });
                Outcome::Uploaded { file_name }
            }
            Err(e) => {
                tracing::warn!(
                    channel_id = channel.id.0,
                    message_id = message.message_id.0,
                    kind = %e.kind,
                    error = %e.error,
                    "Message processing failed"
                );
                self.emit_event(Event::MessageFailed {
                    channel_id: channel.id,
                    message_id: message.message_id,
                    kind: e.kind,
                    error: e.error.to_string(),
                });
                Outcome::Failed { kind: e.kind }
            }
        }
    }

    /// One attempt: download, upload, record. The staging directory is removed afterwards.
    async fn process_once(
        &self,
        channel: &Channel,
        message: &MessageRef,
        file_name: &str,
        source_kind: SourceKind,
    ) -> Result<(), StageError> {
        let staging = self.staging_dir_for(channel, message, source_kind);
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| StageError::new(FailureKind::Staging, e))?;

        let result = self
            .transfer(channel, message, &staging.join(file_name), file_name, source_kind)
            .await;

        discard_staged(&staging).await;
        result
    }

    async fn transfer(
        &self,
        channel: &Channel,
        message: &MessageRef,
        dest: &Path,
        file_name: &str,
        source_kind: SourceKind,
    ) -> Result<(), StageError> {
        let local_path = self
            .source
            .download(message, dest)
            .await
            .map_err(|e| StageError::new(FailureKind::Download, e))?;

        let remote_label = channel.remote_label();
        self.uploader
            .upload(&local_path, &remote_label)
            .await
            .map_err(|e| StageError::new(FailureKind::Upload, e))?;

        // Past this point the file is uploaded; a failed insert leaves it unrecorded
        let record = ProcessedMessageRecord {
            channel_id: channel.id,
            channel_title: channel.title.clone(),
            message_id: message.message_id,
            file_name: uploaded_name(&local_path, file_name),
            cloud_path: remote_label,
            cloud_provider: self.config.upload.cloud_provider.clone(),
            source_kind,
            created_at: chrono::Utc::now(),
        };
        self.store
            .insert_processed_record(&record)
            .await
            .map_err(|e| StageError::new(FailureKind::Record, e))
    }

    /// Per-message staging directory, so concurrent messages with the same
    /// filename never share a path. The source kind keeps a listener upload
    /// and an export of the same message apart.
    fn staging_dir_for(
        &self,
        channel: &Channel,
        message: &MessageRef,
        source_kind: SourceKind,
    ) -> PathBuf {
        self.config.export.staging_dir.join(format!(
            "{}_{}_{}",
            source_kind.as_str(),
            channel.id,
            message.message_id
        ))
    }
}

fn uploaded_name(local_path: &Path, fallback: &str) -> String {
    local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| fallback.to_string())
}

async fn discard_staged(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = ?dir, error = %e, "Failed to remove staged files"),
    }
}
