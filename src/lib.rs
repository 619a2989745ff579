//! # tg-cloud-export
//!
//! Resumable channel-history exporter that forwards message attachments to
//! cloud storage.
//!
//! ## Overview
//!
//! - **Bulk export** - Walks a channel's history oldest first in fixed-size
//!   batches, bounded by a concurrency gate, and commits a durable checkpoint
//!   after every batch so an interrupted export resumes where it stopped
//! - **Live listener** - Forwards new attachments from channels that match a
//!   configured rule as they arrive
//! - **Throttle aware** - Platform rate-limit signals are waited out by the
//!   affected message only; everything else keeps moving
//! - **Pluggable** - The platform client, upload step and store are traits,
//!   injected at construction
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tg_cloud_export::{Config, Exporter, platform::ChannelSource, uploader};
//!
//! # async fn example(source: Arc<dyn ChannelSource>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let uploader = uploader::from_config(&config.upload)?;
//! let exporter = Exporter::new(config, source, uploader).await?;
//!
//! let mut events = exporter.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         tracing::info!(?event, "export event");
//!     }
//! });
//!
//! exporter.start_export("Lecture Notes", &[".pdf".to_string()]).await?;
//! tg_cloud_export::run_with_shutdown(exporter).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Attachment classification and channel rules
pub mod classifier;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Export orchestration (decomposed into focused submodules)
pub mod exporter;
/// Messaging platform seam
pub mod platform;
/// Retry logic with throttle waits and exponential backoff
pub mod retry;
/// Core types and events
pub mod types;
/// Remote upload step
pub mod uploader;

// Re-export commonly used types
pub use classifier::{ChannelRule, Classification, classify};
pub use config::Config;
pub use db::{Database, ExportStore};
pub use error::{
    ApiError, DatabaseError, Error, ErrorDetail, FailureKind, PlatformError, Result, ToHttpStatus,
};
pub use exporter::{ExportJob, Exporter};
pub use platform::ChannelSource;
pub use types::{
    Channel, ChannelId, Event, ExportAccepted, ExportCheckpoint, ExportSummary, LiveMessage,
    Media, MessageId, MessageRef, Outcome, ProcessedMessageRecord, SkipReason, SourceKind,
};
pub use uploader::{CommandUploader, HttpUploader, Uploader};

/// Run the exporter until a termination signal arrives, then shut it down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// A running export stops at its next batch boundary; its committed
/// checkpoint is where the next run resumes.
pub async fn run_with_shutdown(exporter: Exporter) -> Result<()> {
    wait_for_signal().await;
    exporter.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(_), Err(e)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
