//! Startup and shutdown coordination.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use crate::classifier::ClassifyPolicy;
use crate::config::Config;
use crate::db::{Database, ExportStore};
use crate::error::{Error, Result};
use crate::platform::ChannelSource;
use crate::types::Event;
use crate::uploader::Uploader;

use super::{Exporter, JobState};

/// How long shutdown waits for the job worker to reach a batch boundary
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl Exporter {
    /// Create a new exporter backed by the SQLite store at
    /// `config.persistence.database_path`
    ///
    /// This initializes all core components:
    /// - Validates the configuration
    /// - Creates the staging directory
    /// - Opens/creates the SQLite database and runs migrations
    /// - Sets up the event broadcast channel
    /// - Starts the export job worker
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn new(
        config: Config,
        source: Arc<dyn ChannelSource>,
        uploader: Arc<dyn Uploader>,
    ) -> Result<Self> {
        let db = Database::new(&config.persistence.database_path).await?;
        Self::with_store(config, Arc::new(db), source, uploader).await
    }

    /// Create a new exporter with an explicit store
    pub async fn with_store(
        config: Config,
        store: Arc<dyn ExportStore>,
        source: Arc<dyn ChannelSource>,
        uploader: Arc<dyn Uploader>,
    ) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.export.staging_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create staging directory '{}': {}",
                        config.export.staging_dir.display(),
                        e
                    ),
                ))
            })?;

        // Buffer of 1000 events; slow subscribers see RecvError::Lagged
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);
        let (job_tx, job_rx) = mpsc::unbounded_channel();

        let jobs = JobState {
            job_tx,
            concurrent_limit: Arc::new(Semaphore::new(config.export.max_concurrency)),
            accepting_new: Arc::new(AtomicBool::new(true)),
            cancel: CancellationToken::new(),
            worker: Arc::new(Mutex::new(None)),
        };

        tracing::info!(
            uploader = uploader.name(),
            max_concurrency = config.export.max_concurrency,
            batch_size = config.export.batch_size,
            history_limit = config.export.history_limit,
            rules = config.channels.len(),
            "Exporter initialized"
        );

        let exporter = Self {
            store,
            source,
            uploader,
            policy: ClassifyPolicy::from(&config.export),
            config: Arc::new(config),
            event_tx,
            jobs,
        };

        let handle = exporter.start_job_worker(job_rx);
        *exporter.jobs.worker.lock().await = Some(handle);

        Ok(exporter)
    }

    /// Gracefully shut down the exporter
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new export jobs
    /// 2. Cancels the worker and listener; a running export stops at its next
    ///    batch boundary, keeping the last committed checkpoint
    /// 3. Waits for the worker to finish with a timeout (30 seconds)
    /// 4. Emits [`Event::Shutdown`]
    ///
    /// Calling it more than once is harmless.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.jobs.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new exports");

        self.jobs.cancel.cancel();

        let handle = self.jobs.worker.lock().await.take();
        if let Some(handle) = handle {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => tracing::info!("Export worker stopped gracefully"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Export worker ended abnormally"),
                Err(_) => tracing::warn!(
                    "Timeout waiting for export worker, proceeding with shutdown"
                ),
            }
        }

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
