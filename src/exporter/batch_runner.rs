//! Bounded batch runner: checkpointed, concurrency-limited history traversal.
//!
//! History is consumed oldest first and grouped into batches of
//! `export.batch_size`. Every member of a batch is dispatched at once, but a
//! member only starts its pipeline after taking a permit from the shared
//! admission gate, so at most `export.max_concurrency` pipelines are in flight.
//! All members run on the calling task via `join_all`; nothing is spawned.
//!
//! The checkpoint is upserted to the batch's last message id once every member
//! has reached a terminal outcome, whatever those outcomes are.

use futures::StreamExt;
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::classifier::ChannelRule;
use crate::error::{Error, FailureKind};
use crate::retry::{BackoffPolicy, RetryAction, RetryClass};
use crate::types::{
    Channel, Event, ExportCheckpoint, ExportSummary, MessageId, MessageRef, Outcome, SourceKind,
    wait_secs,
};

use super::Exporter;

/// How a run ended
#[derive(Debug)]
pub(crate) enum RunEnd {
    /// History exhausted or the history limit reached
    Completed,
    /// Shutdown requested; stopped at a batch boundary
    Cancelled,
    /// History or checkpoint failure; committed progress is kept
    Failed(Error),
}

/// Result of one export run
#[derive(Debug)]
pub(crate) struct RunReport {
    pub(crate) summary: ExportSummary,
    pub(crate) end: RunEnd,
}

/// Counts pipelines currently mid-flight and remembers the peak
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Exporter {
    /// Walk history after `start_after`, committing a checkpoint per batch.
    pub(crate) async fn run_batches(
        &self,
        channel: &Channel,
        rule: &ChannelRule,
        start_after: MessageId,
    ) -> RunReport {
        let export = &self.config.export;
        let cancel = &self.jobs.cancel;
        let in_flight = Arc::new(InFlight::default());
        let mut history_policy = BackoffPolicy::new(&self.config.retry);

        let mut summary = ExportSummary::default();
        let mut pending: Vec<MessageRef> = Vec::with_capacity(export.batch_size);
        let mut cursor = start_after;
        let mut remaining = export.history_limit;
        let mut end = RunEnd::Completed;

        'pages: while remaining > 0 {
            let mut history = self.source.iterate_history(channel, cursor, remaining);

            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        end = RunEnd::Cancelled;
                        break 'pages;
                    }
                    item = history.next() => item,
                };

                match item {
                    None => break 'pages,
                    Some(Ok(message)) => {
                        if message.message_id <= cursor {
                            tracing::warn!(
                                channel_id = channel.id.0,
                                message_id = message.message_id.0,
                                cursor = cursor.0,
                                "History yielded an out-of-order message, ignoring it"
                            );
                            continue;
                        }
                        cursor = message.message_id;
                        remaining -= 1;
                        pending.push(message);

                        if pending.len() == export.batch_size {
                            let batch = std::mem::take(&mut pending);
                            if let Err(e) =
                                self.commit_batch(channel, rule, batch, &in_flight, &mut summary).await
                            {
                                end = RunEnd::Failed(e);
                                break 'pages;
                            }
                            // Inter-batch pause, on top of any throttle waits
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => {
                                    end = RunEnd::Cancelled;
                                    break 'pages;
                                }
                                _ = tokio::time::sleep(export.batch_pause) => {}
                            }
                        }

                        if remaining == 0 {
                            break 'pages;
                        }
                    }
                    Some(Err(e)) => {
                        let wait = match e.throttle_wait() {
                            Some(wait) => wait,
                            None => {
                                tracing::error!(
                                    channel_id = channel.id.0,
                                    error = %e,
                                    "History fetch failed"
                                );
                                end = RunEnd::Failed(e.into());
                                break 'pages;
                            }
                        };
                        let wait = match history_policy.next_action(RetryClass::Throttle(wait)) {
                            RetryAction::WaitThrottle(wait) => wait,
                            _ => {
                                end = RunEnd::Failed(e.into());
                                break 'pages;
                            }
                        };

                        tracing::warn!(
                            channel_id = channel.id.0,
                            after = cursor.0,
                            wait_secs = wait_secs(wait),
                            "History fetch throttled, waiting before resuming"
                        );
                        self.emit_event(Event::Throttled {
                            channel_id: channel.id,
                            message_id: None,
                            wait_secs: wait_secs(wait),
                        });
                        drop(history);
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                end = RunEnd::Cancelled;
                                break 'pages;
                            }
                            _ = tokio::time::sleep(wait) => {}
                        }
                        // Reopen after the last message we saw
                        continue 'pages;
                    }
                }
            }
        }

        // Trailing partial batch, or messages visited before a history failure.
        // A cancelled run leaves them for the next run.
        if !pending.is_empty() && !matches!(end, RunEnd::Cancelled) {
            if let Err(e) = self
                .commit_batch(channel, rule, pending, &in_flight, &mut summary)
                .await
            {
                if matches!(end, RunEnd::Completed) {
                    end = RunEnd::Failed(e);
                } else {
                    tracing::error!(channel_id = channel.id.0, error = %e, "Failed to commit final batch");
                }
            }
        }

        summary.peak_in_flight = in_flight.peak();
        RunReport { summary, end }
    }

    /// Process every member of `batch` to a terminal outcome, then advance the checkpoint.
    async fn commit_batch(
        &self,
        channel: &Channel,
        rule: &ChannelRule,
        batch: Vec<MessageRef>,
        in_flight: &Arc<InFlight>,
        summary: &mut ExportSummary,
    ) -> crate::Result<()> {
        let Some(last) = batch.last().map(|m| m.message_id) else {
            return Ok(());
        };
        let batch_len = batch.len();

        tracing::debug!(
            channel_id = channel.id.0,
            first = batch[0].message_id.0,
            last = last.0,
            batch_len,
            "Dispatching batch"
        );

        let outcomes = join_all(
            batch
                .iter()
                .map(|message| self.admit(channel, message, rule, in_flight)),
        )
        .await;
        for outcome in &outcomes {
            summary.record(outcome);
        }

        self.store
            .upsert_checkpoint(&ExportCheckpoint {
                channel_id: channel.id,
                last_processed_message_id: last,
                last_processed_at: chrono::Utc::now(),
                channel_title: channel.title.clone(),
            })
            .await
            .inspect_err(|e| {
                tracing::error!(
                    channel_id = channel.id.0,
                    last_message_id = last.0,
                    error = %e,
                    "Failed to advance checkpoint"
                )
            })?;

        summary.batches_committed += 1;
        summary.last_committed = Some(last);
        tracing::info!(
            channel_id = channel.id.0,
            last_message_id = last.0,
            batch_len,
            "Batch committed"
        );
        self.emit_event(Event::BatchCommitted {
            channel_id: channel.id,
            last_message_id: last,
            batch_len,
        });
        Ok(())
    }

    /// Wait for an admission permit, then run the message pipeline.
    async fn admit(
        &self,
        channel: &Channel,
        message: &MessageRef,
        rule: &ChannelRule,
        in_flight: &Arc<InFlight>,
    ) -> Outcome {
        let _permit = match self.jobs.concurrent_limit.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                tracing::error!(
                    message_id = message.message_id.0,
                    "Admission gate closed, message not processed"
                );
                return Outcome::Failed {
                    kind: FailureKind::Other,
                };
            }
        };
        let _guard = in_flight.enter();

        self.process_with_retry(channel, message, rule, SourceKind::Export)
            .await
    }
}
