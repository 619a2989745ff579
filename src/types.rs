//! Core types for tg-cloud-export

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

use crate::error::FailureKind;

macro_rules! sqlite_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Clone,
            Copy,
            Debug,
            Default,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
            ToSchema,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Get the inner i64 value
            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $name {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $name {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(Self(id))
            }
        }
    };
}

sqlite_id!(ChannelId, "Numeric identifier of a channel on the messaging platform");
sqlite_id!(
    MessageId,
    "Numeric identifier of a message; increases monotonically within a channel"
);

/// A resolved channel: numeric id plus display title
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Channel {
    /// Platform channel id
    pub id: ChannelId,
    /// Channel title (may be empty for private chats)
    pub title: String,
}

impl Channel {
    /// Create a new channel handle
    pub fn new(id: impl Into<ChannelId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }

    /// Remote folder label used by the uploader: `"{title}-{id}"`
    pub fn remote_label(&self) -> String {
        format!("{}-{}", self.title, self.id)
    }
}

/// Attachment carried by a message
///
/// Only [`Media::Document`] is eligible for download. Everything else is
/// classified as a skip; unknown platform media kinds land in
/// [`Media::Unsupported`] rather than being silently folded into another case.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Media {
    /// File-like document (pdf, video, audio, archive, ...)
    Document {
        /// Platform attachment id, used to synthesize a filename
        attachment_id: i64,
        /// Declared filename, if the sender provided one
        file_name: Option<String>,
        /// Declared size in bytes, if the platform reported one
        size_bytes: Option<u64>,
    },
    /// Compressed photo
    Photo {
        /// Platform photo id
        photo_id: i64,
    },
    /// Any other media kind (web page preview, poll, contact, geo, ...)
    Unsupported {
        /// Platform name of the media kind, for logging
        kind: String,
    },
}

/// A message produced by history iteration or the live listener
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MessageRef {
    /// Channel the message belongs to
    pub channel_id: ChannelId,
    /// Message id within the channel
    pub message_id: MessageId,
    /// Attachment, if any
    pub media: Option<Media>,
}

/// A message pushed by the platform's live update stream
#[derive(Clone, Debug)]
pub struct LiveMessage {
    /// Channel the message arrived in
    pub channel: Channel,
    /// The message itself
    pub message: MessageRef,
}

/// Where a processed record originated
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Live listener
    Listener,
    /// Bulk export
    Export,
}

impl SourceKind {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Listener => "listener",
            SourceKind::Export => "export",
        }
    }

    /// Parse the database representation (unknown values map to `Export`)
    pub fn from_db(value: &str) -> Self {
        match value {
            "listener" => SourceKind::Listener,
            _ => SourceKind::Export,
        }
    }
}

/// Why the classifier declined an attachment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Message carries no attachment at all
    NoMedia,
    /// Photo or any non-document attachment
    UnsupportedMediaType,
    /// Extension not in the channel's allow-list
    ExtensionNotAllowed,
    /// Declared size above the configured maximum
    ExceedsMaxSize,
}

impl SkipReason {
    /// Stable string form, e.g. `"extension-not-allowed"`
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoMedia => "no-media",
            SkipReason::UnsupportedMediaType => "unsupported-media-type",
            SkipReason::ExtensionNotAllowed => "extension-not-allowed",
            SkipReason::ExceedsMaxSize => "exceeds-max-size",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of processing one message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Downloaded, uploaded and recorded
    Uploaded {
        /// Final local filename that was uploaded
        file_name: String,
    },
    /// Declined by policy, not an error
    SkippedByPolicy {
        /// Why it was declined
        reason: SkipReason,
    },
    /// Failed without further automatic retries
    Failed {
        /// What failed
        kind: FailureKind,
    },
}

impl Outcome {
    /// Whether this outcome is a successful upload
    pub fn is_uploaded(&self) -> bool {
        matches!(self, Outcome::Uploaded { .. })
    }
}

/// Durable "last message processed" marker for one channel
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ExportCheckpoint {
    /// Channel id
    pub channel_id: ChannelId,
    /// Highest message id whose batch fully completed
    pub last_processed_message_id: MessageId,
    /// When the checkpoint was last advanced
    pub last_processed_at: DateTime<Utc>,
    /// Channel title at the time of the last advance
    pub channel_title: String,
}

/// Audit record written for every successfully uploaded attachment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProcessedMessageRecord {
    /// Channel id
    pub channel_id: ChannelId,
    /// Channel title
    pub channel_title: String,
    /// Message id
    pub message_id: MessageId,
    /// Uploaded filename
    pub file_name: String,
    /// Remote folder label the file was uploaded to
    pub cloud_path: String,
    /// Storage provider name (e.g. "terabox")
    pub cloud_provider: String,
    /// Listener or export
    pub source_kind: SourceKind,
    /// When the record was written
    pub created_at: DateTime<Utc>,
}

/// Response returned by the export trigger once a job has been queued
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ExportAccepted {
    /// The channel the request resolved to
    pub channel: Channel,
    /// Normalized allow-list the export will use
    pub allowed_extensions: Vec<String>,
}

/// Per-run tallies produced by the batch runner
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ExportSummary {
    /// Messages visited (every history item, regardless of outcome)
    pub messages_seen: u64,
    /// Attachments uploaded
    pub uploaded: u64,
    /// Messages skipped by policy
    pub skipped: u64,
    /// Messages that failed terminally
    pub failed: u64,
    /// Checkpoint commits performed
    pub batches_committed: u64,
    /// Checkpoint value after the run (None if nothing was ever committed)
    pub last_committed: Option<MessageId>,
    /// Most message pipelines observed in flight at the same time
    pub peak_in_flight: usize,
}

impl ExportSummary {
    /// Fold a single message outcome into the tallies
    pub fn record(&mut self, outcome: &Outcome) {
        self.messages_seen += 1;
        match outcome {
            Outcome::Uploaded { .. } => self.uploaded += 1,
            Outcome::SkippedByPolicy { .. } => self.skipped += 1,
            Outcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Events emitted by the exporter
///
/// Consumers subscribe via [`Exporter::subscribe()`](crate::Exporter::subscribe).
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Export job accepted and queued
    ExportQueued {
        /// Channel to export
        channel: Channel,
    },

    /// Export run started
    ExportStarted {
        /// Channel being exported
        channel: Channel,
        /// Checkpoint the run resumes after (0 = beginning)
        resume_after: MessageId,
    },

    /// Attachment uploaded and recorded
    MessageUploaded {
        /// Channel id
        channel_id: ChannelId,
        /// Message id
        message_id: MessageId,
        /// Uploaded filename
        file_name: String,
        /// Listener or export
        source: SourceKind,
    },

    /// Message skipped by policy
    MessageSkipped {
        /// Channel id
        channel_id: ChannelId,
        /// Message id
        message_id: MessageId,
        /// Why it was skipped
        reason: SkipReason,
    },

    /// Message failed terminally
    MessageFailed {
        /// Channel id
        channel_id: ChannelId,
        /// Message id
        message_id: MessageId,
        /// What failed
        kind: FailureKind,
        /// Error text
        error: String,
    },

    /// A task is waiting out a platform throttle before retrying
    Throttled {
        /// Channel id
        channel_id: ChannelId,
        /// Message id being retried (None while fetching history)
        message_id: Option<MessageId>,
        /// Wait in seconds
        wait_secs: u64,
    },

    /// A batch completed and the checkpoint advanced
    BatchCommitted {
        /// Channel id
        channel_id: ChannelId,
        /// New checkpoint value
        last_message_id: MessageId,
        /// Number of messages in the batch
        batch_len: usize,
    },

    /// Export run finished (history exhausted or page limit reached)
    ExportComplete {
        /// Channel id
        channel_id: ChannelId,
        /// Run tallies
        summary: ExportSummary,
    },

    /// Export run stopped on an error; the last committed checkpoint is kept
    ExportFailed {
        /// Channel id
        channel_id: ChannelId,
        /// Error text
        error: String,
    },

    /// Exporter is shutting down
    Shutdown,
}

/// Convert a throttle wait into whole seconds for events, rounding up
pub(crate) fn wait_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs();
    if wait.subsec_nanos() > 0 { secs + 1 } else { secs }
}
