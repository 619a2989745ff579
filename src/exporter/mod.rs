//! Export orchestration split into focused submodules.
//!
//! The `Exporter` struct and its methods are organized by domain:
//! - [`pipeline`] - Single-message download → upload → record, wrapped in retry
//! - [`batch_runner`] - Checkpointed, concurrency-bounded history traversal
//! - [`orchestrator`] - Export job queue, job worker and live listener
//! - [`lifecycle`] - Construction and shutdown coordination

mod batch_runner;
mod lifecycle;
mod orchestrator;
mod pipeline;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use orchestrator::ExportJob;

use crate::classifier::ClassifyPolicy;
use crate::config::Config;
use crate::db::ExportStore;
use crate::platform::ChannelSource;
use crate::types::Event;
use crate::uploader::Uploader;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

/// Export job queue and worker state
#[derive(Clone)]
pub(crate) struct JobState {
    /// Sender half of the job queue consumed by the worker task
    pub(crate) job_tx: mpsc::UnboundedSender<ExportJob>,
    /// Admission gate bounding in-flight message pipelines
    pub(crate) concurrent_limit: Arc<Semaphore>,
    /// Flag to indicate whether new jobs are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Cancelled on shutdown; export runs stop at the next batch boundary
    pub(crate) cancel: CancellationToken,
    /// Worker task handle, taken by shutdown
    pub(crate) worker: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

/// Main exporter instance (cloneable - all fields are Arc-wrapped)
///
/// Collaborators are injected at construction; nothing here is a process-wide
/// singleton.
#[derive(Clone)]
pub struct Exporter {
    /// Checkpoint and record store
    pub(crate) store: Arc<dyn ExportStore>,
    /// Messaging platform client
    pub(crate) source: Arc<dyn ChannelSource>,
    /// Remote upload collaborator
    pub(crate) uploader: Arc<dyn Uploader>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Size policy derived from `config.export`
    pub(crate) policy: ClassifyPolicy,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Job queue and worker state
    pub(crate) jobs: JobState,
}

impl Exporter {
    /// Subscribe to exporter events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// Events are buffered, but if a subscriber falls behind by more than 1000 events,
    /// it will receive a `RecvError::Lagged` error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use tg_cloud_export::Exporter;
    /// # fn example(exporter: Exporter) {
    /// let mut events = exporter.subscribe();
    /// tokio::spawn(async move {
    ///     while let Ok(event) = events.recv().await {
    ///         tracing::info!(?event, "export event");
    ///     }
    /// });
    /// # }
    /// ```
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// The store this exporter writes checkpoints and records to
    pub fn store(&self) -> Arc<dyn ExportStore> {
        Arc::clone(&self.store)
    }

    /// Whether new export jobs are still accepted
    pub fn is_accepting(&self) -> bool {
        self.jobs
            .accepting_new
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Spawn the REST API server in a background task
    pub fn spawn_api_server(&self) -> tokio::task::JoinHandle<crate::Result<()>> {
        let exporter = Arc::new(self.clone());
        let config = self.config.clone();

        tokio::spawn(async move { crate::api::start_api_server(exporter, config).await })
    }
}
