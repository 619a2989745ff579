//! Export orchestration: trigger entry point, job worker, live listener.

use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::classifier::{ChannelRule, match_rule, normalize_extensions};
use crate::error::{Error, Result};
use crate::platform::resolve_channel;
use crate::types::{Channel, Event, ExportAccepted, ExportSummary, LiveMessage, Outcome, SourceKind};

use super::Exporter;
use super::batch_runner::RunEnd;

/// A queued bulk export: the resolved channel and the rule its messages are classified with
#[derive(Clone, Debug)]
pub struct ExportJob {
    /// Channel to export
    pub channel: Channel,
    /// Rule pinned to that channel, carrying the requested allow-list
    pub rule: ChannelRule,
}

impl Exporter {
    /// Resolve a channel and queue a bulk export for it.
    ///
    /// Returns as soon as the job is queued; the export itself runs on the
    /// worker task and reports progress only through events, logs, and the
    /// stored checkpoint and records.
    ///
    /// `channel` is a title substring, or a numeric id (tried as an id first).
    /// `extensions` entries may be comma-separated and may omit the leading dot.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if no channel matches
    /// - [`Error::ShuttingDown`] once shutdown has begun
    /// - [`Error::Platform`] if the platform lookup itself fails
    pub async fn start_export(&self, channel: &str, extensions: &[String]) -> Result<ExportAccepted> {
        if !self.jobs.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let resolved = resolve_channel(self.source.as_ref(), channel)
            .await?
            .ok_or_else(|| Error::NotFound(format!("channel '{}'", channel)))?;

        let allowed_extensions = normalize_extensions(extensions.iter().map(String::as_str));
        let job = ExportJob {
            rule: ChannelRule::for_channel(&resolved, &allowed_extensions),
            channel: resolved.clone(),
        };

        self.jobs
            .job_tx
            .send(job)
            .map_err(|_| Error::ShuttingDown)?;

        tracing::info!(
            channel_id = resolved.id.0,
            channel_title = %resolved.title,
            extensions = ?allowed_extensions,
            "Export queued"
        );
        self.emit_event(Event::ExportQueued {
            channel: resolved.clone(),
        });

        Ok(ExportAccepted {
            channel: resolved,
            allowed_extensions,
        })
    }

    /// Run one bulk export to completion on the calling task.
    ///
    /// Reads the channel's checkpoint (absent means "from the beginning") and
    /// drives the batch runner. The worker task calls this for queued jobs;
    /// embedders may call it directly to export synchronously.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] if shutdown interrupted the run
    /// - store or history errors that stopped the run; progress committed
    ///   before the error is kept
    pub async fn export_channel(&self, channel: &Channel, rule: &ChannelRule) -> Result<ExportSummary> {
        let checkpoint = match self.store.find_checkpoint(channel.id).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                tracing::error!(channel_id = channel.id.0, error = %e, "Failed to read checkpoint");
                self.emit_event(Event::ExportFailed {
                    channel_id: channel.id,
                    error: e.to_string(),
                });
                return Err(e);
            }
        };
        let resume_after = checkpoint
            .map(|c| c.last_processed_message_id)
            .unwrap_or_default();

        tracing::info!(
            channel_id = channel.id.0,
            channel_title = %channel.title,
            resume_after = resume_after.0,
            "Export started"
        );
        self.emit_event(Event::ExportStarted {
            channel: channel.clone(),
            resume_after,
        });

        let report = self.run_batches(channel, rule, resume_after).await;
        let summary = report.summary;

        match report.end {
            RunEnd::Completed => {
                tracing::info!(
                    channel_id = channel.id.0,
                    seen = summary.messages_seen,
                    uploaded = summary.uploaded,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    batches = summary.batches_committed,
                    "Export complete"
                );
                self.emit_event(Event::ExportComplete {
                    channel_id: channel.id,
                    summary: summary.clone(),
                });
                Ok(summary)
            }
            RunEnd::Cancelled => {
                tracing::info!(
                    channel_id = channel.id.0,
                    last_committed = ?summary.last_committed.map(|id| id.0),
                    "Export interrupted by shutdown"
                );
                Err(Error::ShuttingDown)
            }
            RunEnd::Failed(e) => {
                tracing::error!(
                    channel_id = channel.id.0,
                    last_committed = ?summary.last_committed.map(|id| id.0),
                    error = %e,
                    "Export failed"
                );
                self.emit_event(Event::ExportFailed {
                    channel_id: channel.id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Start the job worker task
    ///
    /// Jobs are run one at a time, in the order they were queued, until
    /// shutdown cancels the worker or the queue closes.
    pub(crate) fn start_job_worker(
        &self,
        mut job_rx: mpsc::UnboundedReceiver<super::ExportJob>,
    ) -> tokio::task::JoinHandle<()> {
        let exporter = self.clone();
        let cancel = self.jobs.cancel.clone();

        tokio::spawn(async move {
            loop {
                let job = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    job = job_rx.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                };

                // Outcome already logged and emitted as events
                let _ = exporter.export_channel(&job.channel, &job.rule).await;
            }
            tracing::debug!("Export worker stopped");
        })
    }

    /// Handle one live message from the platform's update stream.
    ///
    /// The message is processed on the calling task through the
    /// single-message pipeline with the first matching channel rule. No batching and no checkpoint.
    /// Returns `None` when no rule matches or the message carries no media.
    pub async fn handle_live_message(&self, live: &LiveMessage) -> Option<Outcome> {
        let rule = match_rule(&self.config.channels, &live.channel)?;
        live.message.media.as_ref()?;

        Some(
            self.process_with_retry(&live.channel, &live.message, rule, SourceKind::Listener)
                .await,
        )
    }

    /// Drain live messages until the sender closes or shutdown begins.
    ///
    /// Every message runs on its own task, so a throttle wait holds up only
    /// the message that hit it. When the sender closes, in-flight messages
    /// are awaited before returning. On shutdown they are abandoned.
    pub async fn run_listener(&self, mut messages: mpsc::Receiver<LiveMessage>) {
        tracing::info!(rules = self.config.channels.len(), "Listener started");
        let cancel = self.jobs.cancel.clone();
        let mut in_flight = JoinSet::new();

        loop {
            let live = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_listener_task(joined);
                    continue;
                }
                live = messages.recv() => match live {
                    Some(live) => live,
                    None => break,
                },
            };

            let exporter = self.clone();
            let cancel = cancel.clone();
            in_flight.spawn(async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    outcome = exporter.handle_live_message(&live) => {
                        if outcome.is_none() {
                            tracing::trace!(
                                channel_id = live.channel.id.0,
                                message_id = live.message.message_id.0,
                                "Live message ignored"
                            );
                        }
                    }
                }
            });
        }

        if cancel.is_cancelled() {
            if !in_flight.is_empty() {
                tracing::info!(in_flight = in_flight.len(), "Abandoning live messages on shutdown");
            }
            in_flight.shutdown().await;
        } else {
            while let Some(joined) = in_flight.join_next().await {
                log_listener_task(joined);
            }
        }
        tracing::info!("Listener stopped");
    }
}

fn log_listener_task(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Live message task panicked");
    }
}
