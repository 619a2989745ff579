//! Shared fakes and harness for exporter and API tests.

use super::Exporter;
use crate::config::{Config, ExportConfig, RetryConfig};
use crate::db::{Database, ExportStore};
use crate::error::{Error, PlatformError, Result};
use crate::platform::ChannelSource;
use crate::types::{
    Channel, ChannelId, ExportCheckpoint, Media, MessageId, MessageRef, ProcessedMessageRecord,
};
use crate::uploader::Uploader;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct FakeSource {
    pub(crate) channels: Vec<Channel>,
    pub(crate) history: Vec<MessageRef>,
    /// message id -> (remaining throttles, wait)
    pub(crate) download_throttles: StdMutex<HashMap<i64, (u32, Duration)>>,
    pub(crate) download_failures: HashSet<i64>,
    pub(crate) download_delay: Duration,
    /// Yield this many items, then a throttle error (fires once)
    pub(crate) history_throttle: StdMutex<Option<(usize, Duration)>>,
    /// Yield this many items in total, then a hard history error
    pub(crate) history_error_after: Option<usize>,
    pub(crate) downloads: StdMutex<Vec<i64>>,
    pub(crate) history_calls: StdMutex<Vec<(MessageId, usize)>>,
    pub(crate) current: AtomicUsize,
    pub(crate) peak: AtomicUsize,
}

impl FakeSource {
    pub(crate) fn with_documents(channel: Channel, count: i64) -> Self {
        let history = (1..=count)
            .map(|id| document(channel.id, id, &format!("doc_{id}.pdf"), 1024))
            .collect();
        Self {
            channels: vec![channel],
            history,
            ..Self::default()
        }
    }

    pub(crate) fn download_count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }

    pub(crate) fn downloads_of(&self, id: i64) -> usize {
        self.downloads
            .lock()
            .unwrap()
            .iter()
            .filter(|d| **d == id)
            .count()
    }
}

#[async_trait::async_trait]
impl ChannelSource for FakeSource {
    async fn find_channel_by_id(&self, id: ChannelId) -> std::result::Result<Option<Channel>, PlatformError> {
        Ok(self.channels.iter().find(|c| c.id == id).cloned())
    }

    async fn find_channel_by_title(
        &self,
        fragment: &str,
    ) -> std::result::Result<Option<Channel>, PlatformError> {
        Ok(self
            .channels
            .iter()
            .find(|c| c.title.contains(fragment))
            .cloned())
    }

    fn iterate_history<'a>(
        &'a self,
        channel: &'a Channel,
        after: MessageId,
        limit: usize,
    ) -> BoxStream<'a, std::result::Result<MessageRef, PlatformError>> {
        self.history_calls.lock().unwrap().push((after, limit));

        let mut items: Vec<std::result::Result<MessageRef, PlatformError>> = self
            .history
            .iter()
            .filter(|m| m.channel_id == channel.id && m.message_id > after)
            .take(limit)
            .cloned()
            .map(Ok)
            .collect();

        if let Some((count, wait)) = self.history_throttle.lock().unwrap().take() {
            items.truncate(count);
            items.push(Err(PlatformError::Throttled { wait }));
        } else if let Some(total) = self.history_error_after {
            let already = self
                .history
                .iter()
                .filter(|m| m.message_id <= after)
                .count();
            if already + items.len() > total {
                items.truncate(total.saturating_sub(already));
                items.push(Err(PlatformError::History("connection reset".into())));
            }
        }

        stream::iter(items).boxed()
    }

    async fn download(
        &self,
        message: &MessageRef,
        dest: &Path,
    ) -> std::result::Result<PathBuf, PlatformError> {
        let id = message.message_id.0;
        self.downloads.lock().unwrap().push(id);

        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.download_delay.is_zero() {
            tokio::time::sleep(self.download_delay).await;
        }
        self.current.fetch_sub(1, Ordering::SeqCst);

        let throttle = {
            let mut throttles = self.download_throttles.lock().unwrap();
            match throttles.get_mut(&id) {
                Some((remaining, wait)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(*wait)
                }
                _ => None,
            }
        };
        if let Some(wait) = throttle {
            return Err(PlatformError::Throttled { wait });
        }
        if self.download_failures.contains(&id) {
            return Err(PlatformError::Download {
                message_id: id,
                reason: "file reference expired".into(),
            });
        }

        tokio::fs::write(dest, b"attachment")
            .await
            .map_err(|e| PlatformError::Download {
                message_id: id,
                reason: e.to_string(),
            })?;
        Ok(dest.to_path_buf())
    }
}

#[derive(Default)]
pub(crate) struct FakeUploader {
    pub(crate) uploads: StdMutex<Vec<(PathBuf, String)>>,
    pub(crate) fail_names: HashSet<String>,
}

#[async_trait::async_trait]
impl Uploader for FakeUploader {
    async fn upload(&self, local_path: &Path, remote_label: &str) -> Result<()> {
        assert!(local_path.exists(), "staged file must exist at upload time");
        self.uploads
            .lock()
            .unwrap()
            .push((local_path.to_path_buf(), remote_label.to_string()));

        let name = local_path.file_name().unwrap().to_string_lossy().to_string();
        if self.fail_names.contains(&name) {
            return Err(Error::Upload("quota exceeded".into()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    pub(crate) checkpoints: StdMutex<HashMap<ChannelId, ExportCheckpoint>>,
    pub(crate) upserts: StdMutex<Vec<i64>>,
    pub(crate) records: StdMutex<Vec<ProcessedMessageRecord>>,
    pub(crate) fail_inserts: AtomicBool,
}

impl MemoryStore {
    pub(crate) fn upserts(&self) -> Vec<i64> {
        self.upserts.lock().unwrap().clone()
    }

    pub(crate) fn checkpoint(&self, channel: ChannelId) -> Option<i64> {
        self.checkpoints
            .lock()
            .unwrap()
            .get(&channel)
            .map(|c| c.last_processed_message_id.0)
    }
}

#[async_trait::async_trait]
impl ExportStore for MemoryStore {
    async fn find_checkpoint(&self, channel_id: ChannelId) -> Result<Option<ExportCheckpoint>> {
        Ok(self.checkpoints.lock().unwrap().get(&channel_id).cloned())
    }

    async fn upsert_checkpoint(&self, checkpoint: &ExportCheckpoint) -> Result<()> {
        self.upserts
            .lock()
            .unwrap()
            .push(checkpoint.last_processed_message_id.0);
        let mut map = self.checkpoints.lock().unwrap();
        let entry = map
            .entry(checkpoint.channel_id)
            .or_insert_with(|| checkpoint.clone());
        if checkpoint.last_processed_message_id >= entry.last_processed_message_id {
            *entry = checkpoint.clone();
        }
        Ok(())
    }

    async fn insert_processed_record(&self, record: &ProcessedMessageRecord) -> Result<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Error::Other("store unavailable".into()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn books() -> Channel {
    Channel::new(-100, "Books")
}

pub(crate) fn document(channel: ChannelId, id: i64, name: &str, size: u64) -> MessageRef {
    MessageRef {
        channel_id: channel,
        message_id: MessageId(id),
        media: Some(Media::Document {
            attachment_id: 9000 + id,
            file_name: Some(name.to_string()),
            size_bytes: Some(size),
        }),
    }
}

pub(crate) fn test_config(staging: &TempDir) -> Config {
    Config {
        export: ExportConfig {
            staging_dir: staging.path().join("staging"),
            batch_size: 5,
            max_concurrency: 5,
            batch_pause: Duration::ZERO,
            ..ExportConfig::default()
        },
        retry: RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        },
        ..Config::default()
    }
}

pub(crate) struct Harness {
    pub(crate) exporter: Exporter,
    pub(crate) source: Arc<FakeSource>,
    pub(crate) uploader: Arc<FakeUploader>,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) _staging: TempDir,
}

pub(crate) async fn harness_with(
    source: FakeSource,
    uploader: FakeUploader,
    configure: impl FnOnce(&mut Config),
) -> Harness {
    let staging = tempfile::tempdir().unwrap();
    let mut config = test_config(&staging);
    configure(&mut config);

    let source = Arc::new(source);
    let uploader = Arc::new(uploader);
    let store = Arc::new(MemoryStore::default());

    let exporter = Exporter::with_store(
        config,
        store.clone(),
        source.clone(),
        uploader.clone(),
    )
    .await
    .unwrap();

    Harness {
        exporter,
        source,
        uploader,
        store,
        _staging: staging,
    }
}

pub(crate) async fn harness(source: FakeSource) -> Harness {
    harness_with(source, FakeUploader::default(), |_| {}).await
}

/// Exporter over a real SQLite database in a temp dir, for API tests.
/// Returns the exporter, its fake source and the tempdir (which must be kept alive).
pub(crate) async fn create_test_exporter(source: FakeSource) -> (Exporter, Arc<FakeSource>, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&temp_dir);
    config.persistence.database_path = temp_dir.path().join("test.db");

    let db = Database::new(&config.persistence.database_path)
        .await
        .unwrap();
    let source = Arc::new(source);
    let exporter = Exporter::with_store(
        config,
        Arc::new(db),
        source.clone(),
        Arc::new(FakeUploader::default()),
    )
    .await
    .unwrap();

    (exporter, source, temp_dir)
}
