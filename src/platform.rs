//! Messaging-platform boundary
//!
//! The exporter never speaks the platform's wire protocol. An embedder wraps
//! its platform client in a [`ChannelSource`] and hands it to
//! [`Exporter::new`](crate::Exporter::new).

use futures::stream::BoxStream;
use std::path::{Path, PathBuf};

use crate::error::PlatformError;
use crate::types::{Channel, ChannelId, MessageId, MessageRef};

/// Abstraction over the platform client, enabling testability.
#[async_trait::async_trait]
pub trait ChannelSource: Send + Sync {
    /// Look up a channel the account can see by its numeric id
    async fn find_channel_by_id(&self, id: ChannelId) -> Result<Option<Channel>, PlatformError>;

    /// First channel (in the platform's dialog order) whose title contains `fragment`
    async fn find_channel_by_title(&self, fragment: &str)
    -> Result<Option<Channel>, PlatformError>;

    /// Lazily iterate history after `after`, oldest first, yielding at most `limit` messages.
    ///
    /// Implementations must yield strictly increasing message ids. A
    /// [`PlatformError::Throttled`] item ends the stream; the caller waits and
    /// reopens it after the last id it saw.
    fn iterate_history<'a>(
        &'a self,
        channel: &'a Channel,
        after: MessageId,
        limit: usize,
    ) -> BoxStream<'a, Result<MessageRef, PlatformError>>;

    /// Download the message's attachment to `dest`, returning the path written
    async fn download(&self, message: &MessageRef, dest: &Path) -> Result<PathBuf, PlatformError>;
}

/// Resolve a trigger's channel query.
///
/// A query that parses as an integer is tried as a channel id first; any query
/// falls back to first-match-by-title-substring. Blank queries never resolve.
pub async fn resolve_channel(
    source: &dyn ChannelSource,
    query: &str,
) -> Result<Option<Channel>, PlatformError> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(None);
    }

    if let Ok(id) = query.parse::<ChannelId>() {
        if let Some(channel) = source.find_channel_by_id(id).await? {
            return Ok(Some(channel));
        }
    }

    source.find_channel_by_title(query).await
}
