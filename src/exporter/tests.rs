use super::test_helpers::*;
use super::*;
use crate::classifier::ChannelRule;
use crate::error::{Error, FailureKind, PlatformError};
use crate::types::{
    Channel, Event, ExportCheckpoint, LiveMessage, Media, MessageId, MessageRef, Outcome,
    SkipReason, SourceKind,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn any_rule(channel: &Channel) -> ChannelRule {
    ChannelRule::for_channel(channel, &[])
}

async fn wait_for(
    rx: &mut broadcast::Receiver<Event>,
    mut predicate: impl FnMut(&Event) -> bool,
) -> Event {
    loop {
        let event = rx.recv().await.unwrap();
        if predicate(&event) {
            return event;
        }
    }
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ---------------------------------------------------------------------------
// Batch runner
// ---------------------------------------------------------------------------

#[tokio::test]
async fn twelve_messages_commit_three_batches() {
    let h = harness(FakeSource::with_documents(books(), 12)).await;

    let summary = h
        .exporter
        .export_channel(&books(), &any_rule(&books()))
        .await
        .unwrap();

    assert_eq!(h.store.upserts(), vec![5, 10, 12]);
    assert_eq!(summary.batches_committed, 3);
    assert_eq!(summary.uploaded, 12);
    assert_eq!(summary.messages_seen, 12);
    assert_eq!(summary.last_committed, Some(MessageId(12)));
    assert_eq!(h.store.records.lock().unwrap().len(), 12);
}

#[tokio::test]
async fn second_run_without_new_history_downloads_nothing() {
    let h = harness(FakeSource::with_documents(books(), 12)).await;
    let rule = any_rule(&books());

    h.exporter.export_channel(&books(), &rule).await.unwrap();
    let downloads_after_first = h.source.download_count();

    let summary = h.exporter.export_channel(&books(), &rule).await.unwrap();

    assert_eq!(h.source.download_count(), downloads_after_first);
    assert_eq!(summary.messages_seen, 0);
    assert_eq!(summary.batches_committed, 0);
    assert_eq!(h.store.checkpoint(books().id), Some(12));
}

#[tokio::test]
async fn resumes_after_existing_checkpoint() {
    let h = harness(FakeSource::with_documents(books(), 12)).await;
    h.store
        .upsert_checkpoint(&ExportCheckpoint {
            channel_id: books().id,
            last_processed_message_id: MessageId(10),
            last_processed_at: chrono::Utc::now(),
            channel_title: "Books".into(),
        })
        .await
        .unwrap();

    let summary = h
        .exporter
        .export_channel(&books(), &any_rule(&books()))
        .await
        .unwrap();

    assert_eq!(summary.uploaded, 2);
    assert_eq!(h.source.downloads_of(10), 0);
    assert_eq!(h.source.downloads_of(11), 1);
    assert_eq!(h.store.checkpoint(books().id), Some(12));
}

#[tokio::test(start_paused = true)]
async fn throttled_message_is_waited_out_before_commit() {
    let source = FakeSource::with_documents(books(), 5);
    source
        .download_throttles
        .lock()
        .unwrap()
        .insert(3, (1, Duration::from_secs(2)));
    let h = harness(source).await;
    let mut events = h.exporter.subscribe();

    let start = tokio::time::Instant::now();
    let summary = h
        .exporter
        .export_channel(&books(), &any_rule(&books()))
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(summary.uploaded, 5);
    assert_eq!(summary.failed, 0);
    assert_eq!(h.source.downloads_of(3), 2);
    assert_eq!(h.store.upserts(), vec![5]);

    let events = drain(&mut events);
    let position = |pred: &dyn Fn(&Event) -> bool| events.iter().position(pred).unwrap();
    let throttled = position(&|e| {
        matches!(e, Event::Throttled { message_id: Some(MessageId(3)), wait_secs: 2, .. })
    });
    let uploaded_3 = position(&|e| {
        matches!(e, Event::MessageUploaded { message_id: MessageId(3), .. })
    });
    let committed = position(&|e| matches!(e, Event::BatchCommitted { .. }));
    assert!(throttled < uploaded_3);
    assert!(uploaded_3 < committed);
}

#[tokio::test(start_paused = true)]
async fn throttle_does_not_stall_other_messages() {
    let source = FakeSource::with_documents(books(), 5);
    source
        .download_throttles
        .lock()
        .unwrap()
        .insert(1, (1, Duration::from_secs(30)));
    let h = harness(source).await;
    let mut events = h.exporter.subscribe();

    h.exporter
        .export_channel(&books(), &any_rule(&books()))
        .await
        .unwrap();

    let uploads: Vec<i64> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            Event::MessageUploaded { message_id, .. } => Some(message_id.0),
            _ => None,
        })
        .collect();
    assert_eq!(uploads.len(), 5);
    assert_eq!(*uploads.last().unwrap(), 1, "throttled message finishes last");
}

#[tokio::test(start_paused = true)]
async fn concurrency_never_exceeds_limit() {
    let mut source = FakeSource::with_documents(books(), 5);
    source.download_delay = Duration::from_millis(50);
    let h = harness_with(source, FakeUploader::default(), |c| {
        c.export.max_concurrency = 3;
        c.export.batch_size = 5;
    })
    .await;

    let summary = h
        .exporter
        .export_channel(&books(), &any_rule(&books()))
        .await
        .unwrap();

    assert_eq!(summary.uploaded, 5);
    assert_eq!(h.source.peak.load(Ordering::SeqCst), 3);
    assert!(summary.peak_in_flight <= 3);
    assert_eq!(summary.peak_in_flight, 3);
}

#[tokio::test(start_paused = true)]
async fn pause_follows_each_full_batch_only() {
    let h = harness_with(FakeSource::with_documents(books(), 12), FakeUploader::default(), |c| {
        c.export.batch_pause = Duration::from_secs(1);
    })
    .await;

    let start = tokio::time::Instant::now();
    h.exporter
        .export_channel(&books(), &any_rule(&books()))
        .await
        .unwrap();

    // Two full batches, then a trailing partial batch with no pause
    assert_eq!(start.elapsed(), Duration::from_secs(2));
}

#[tokio::test]
async fn failed_message_does_not_block_checkpoint() {
    let uploader = FakeUploader {
        fail_names: HashSet::from(["doc_2.pdf".to_string()]),
        ..FakeUploader::default()
    };
    let mut source = FakeSource::with_documents(books(), 5);
    source.download_failures.insert(4);
    let h = harness_with(source, uploader, |_| {}).await;

    let summary = h
        .exporter
        .export_channel(&books(), &any_rule(&books()))
        .await
        .unwrap();

    assert_eq!(summary.uploaded, 3);
    assert_eq!(summary.failed, 2);
    assert_eq!(h.store.checkpoint(books().id), Some(5));
    assert_eq!(h.source.downloads_of(2), 1, "no automatic retry of ordinary failures");
    assert_eq!(h.source.downloads_of(4), 1);
}

#[tokio::test]
async fn policy_skips_are_counted_and_checkpointed() {
    let channel = books();
    let mut source = FakeSource::with_documents(channel.clone(), 0);
    source.history = vec![
        document(channel.id, 1, "report.pdf", 1024 * 1024),
        document(channel.id, 2, "movie.mp4", 1024),
        MessageRef {
            channel_id: channel.id,
            message_id: MessageId(3),
            media: Some(Media::Photo { photo_id: 1 }),
        },
        MessageRef {
            channel_id: channel.id,
            message_id: MessageId(4),
            media: None,
        },
        document(channel.id, 5, "huge.pdf", 200 * 1024 * 1024),
    ];
    let h = harness(source).await;
    let rule = ChannelRule::for_channel(&channel, &[".pdf".to_string()]);

    let summary = h.exporter.export_channel(&channel, &rule).await.unwrap();

    assert_eq!(summary.uploaded, 1);
    assert_eq!(summary.skipped, 4);
    assert_eq!(h.source.download_count(), 1);
    assert_eq!(h.store.checkpoint(channel.id), Some(5));
}

#[tokio::test]
async fn record_failure_after_upload_is_reported() {
    let h = harness(FakeSource::with_documents(books(), 1)).await;
    h.store.fail_inserts.store(true, Ordering::SeqCst);

    let outcome = h
        .exporter
        .process_with_retry(
            &books(),
            &document(books().id, 1, "doc_1.pdf", 10),
            &any_rule(&books()),
            SourceKind::Export,
        )
        .await;

    assert_eq!(
        outcome,
        Outcome::Failed {
            kind: FailureKind::Record
        }
    );
    assert_eq!(h.uploader.uploads.lock().unwrap().len(), 1, "file was uploaded");
    assert!(h.store.records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn uploads_use_remote_label_and_clean_staging() {
    let h = harness(FakeSource::with_documents(books(), 2)).await;

    h.exporter
        .export_channel(&books(), &any_rule(&books()))
        .await
        .unwrap();

    let uploads = h.uploader.uploads.lock().unwrap().clone();
    assert!(uploads.iter().all(|(_, label)| label == "Books--100"));
    for (path, _) in &uploads {
        assert!(!path.exists(), "staged file removed after upload");
    }

    let records = h.store.records.lock().unwrap().clone();
    assert_eq!(records[0].cloud_provider, "terabox");
    assert_eq!(records[0].source_kind, SourceKind::Export);
    assert_eq!(records[0].cloud_path, "Books--100");
}

#[tokio::test(start_paused = true)]
async fn listener_and_export_of_same_message_stage_apart() {
    let mut source = FakeSource::with_documents(books(), 1);
    source.download_delay = Duration::from_millis(50);
    let h = harness_with(source, FakeUploader::default(), |c| {
        c.channels = vec![ChannelRule::for_title("Books")];
    })
    .await;
    let message = h.source.history[0].clone();

    let channel = books();
    let rule = any_rule(&books());
    let live_message = live(books(), message);
    let (summary, outcome) = tokio::join!(
        h.exporter.export_channel(&channel, &rule),
        h.exporter.handle_live_message(&live_message),
    );

    assert_eq!(summary.unwrap().uploaded, 1);
    assert!(matches!(outcome, Some(Outcome::Uploaded { .. })));

    let dirs: HashSet<PathBuf> = h
        .uploader
        .uploads
        .lock()
        .unwrap()
        .iter()
        .map(|(path, _)| path.parent().unwrap().to_path_buf())
        .collect();
    assert_eq!(dirs.len(), 2, "each path stages into its own directory");
    assert_eq!(h.store.records.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn history_limit_caps_a_run() {
    let h = harness_with(FakeSource::with_documents(books(), 12), FakeUploader::default(), |c| {
        c.export.history_limit = 7;
    })
    .await;
    let rule = any_rule(&books());

    h.exporter.export_channel(&books(), &rule).await.unwrap();
    assert_eq!(h.store.upserts(), vec![5, 7]);

    h.exporter.export_channel(&books(), &rule).await.unwrap();
    assert_eq!(h.store.upserts(), vec![5, 7, 12]);
}

#[tokio::test(start_paused = true)]
async fn history_throttle_reopens_after_last_seen_message() {
    let source = FakeSource::with_documents(books(), 12);
    *source.history_throttle.lock().unwrap() = Some((3, Duration::from_secs(5)));
    let h = harness(source).await;

    let start = tokio::time::Instant::now();
    let summary = h
        .exporter
        .export_channel(&books(), &any_rule(&books()))
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_secs(5));
    assert_eq!(summary.uploaded, 12);
    assert_eq!(h.store.upserts(), vec![5, 10, 12]);
    for id in 1..=12 {
        assert_eq!(h.source.downloads_of(id), 1, "message {id} processed once");
    }
    let calls = h.source.history_calls.lock().unwrap().clone();
    assert_eq!(calls, vec![(MessageId(0), 100), (MessageId(3), 97)]);
}

#[tokio::test]
async fn history_error_commits_visited_messages_then_fails() {
    let mut source = FakeSource::with_documents(books(), 12);
    source.history_error_after = Some(7);
    let h = harness(source).await;
    let mut events = h.exporter.subscribe();

    let err = h
        .exporter
        .export_channel(&books(), &any_rule(&books()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Platform(PlatformError::History(_))));
    assert_eq!(h.store.upserts(), vec![5, 7]);
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, Event::ExportFailed { .. }))
    );
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_export_queues_and_worker_runs_job() {
    let h = harness(FakeSource::with_documents(books(), 6)).await;
    let mut events = h.exporter.subscribe();

    let accepted = h
        .exporter
        .start_export("Boo", &["pdf, .mp4".to_string()])
        .await
        .unwrap();

    assert_eq!(accepted.channel, books());
    assert_eq!(accepted.allowed_extensions, vec![".pdf", ".mp4"]);

    let done = wait_for(&mut events, |e| matches!(e, Event::ExportComplete { .. })).await;
    match done {
        Event::ExportComplete { summary, .. } => assert_eq!(summary.uploaded, 6),
        _ => unreachable!(),
    }
    assert_eq!(h.store.checkpoint(books().id), Some(6));
}

#[tokio::test]
async fn start_export_filters_with_requested_extensions() {
    let channel = books();
    let mut source = FakeSource::with_documents(channel.clone(), 0);
    source.history = vec![
        document(channel.id, 1, "a.pdf", 10),
        document(channel.id, 2, "b.epub", 10),
    ];
    let h = harness(source).await;
    let mut events = h.exporter.subscribe();

    h.exporter
        .start_export("-100", &[".epub".to_string()])
        .await
        .unwrap();
    wait_for(&mut events, |e| matches!(e, Event::ExportComplete { .. })).await;

    let records = h.store.records.lock().unwrap().clone();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].file_name, "b.epub");
}

#[tokio::test]
async fn start_export_unknown_channel_is_not_found() {
    let h = harness(FakeSource::with_documents(books(), 1)).await;

    let err = h
        .exporter
        .start_export("Chemistry", &[])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(h.source.download_count(), 0);
}

#[tokio::test]
async fn start_export_after_shutdown_is_rejected() {
    let h = harness(FakeSource::with_documents(books(), 1)).await;
    let mut events = h.exporter.subscribe();

    h.exporter.shutdown().await.unwrap();

    assert!(!h.exporter.is_accepting());
    let err = h.exporter.start_export("Books", &[]).await.unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, Event::Shutdown))
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_export_at_batch_boundary() {
    let h = harness_with(FakeSource::with_documents(books(), 12), FakeUploader::default(), |c| {
        c.export.batch_pause = Duration::from_secs(60);
    })
    .await;
    let mut events = h.exporter.subscribe();

    h.exporter.start_export("Books", &[]).await.unwrap();
    wait_for(&mut events, |e| matches!(e, Event::BatchCommitted { .. })).await;

    h.exporter.shutdown().await.unwrap();

    assert_eq!(h.store.upserts(), vec![5]);
    assert_eq!(h.source.download_count(), 5);
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

fn live(channel: Channel, message: MessageRef) -> LiveMessage {
    LiveMessage { channel, message }
}

#[tokio::test]
async fn live_message_from_unmatched_channel_is_ignored() {
    let h = harness_with(FakeSource::default(), FakeUploader::default(), |c| {
        c.channels = vec![ChannelRule::for_title("Books")];
    })
    .await;
    let other = Channel::new(7, "Music");

    let outcome = h
        .exporter
        .handle_live_message(&live(other.clone(), document(other.id, 1, "a.pdf", 1)))
        .await;

    assert!(outcome.is_none());
    assert_eq!(h.source.download_count(), 0);
}

#[tokio::test]
async fn live_message_without_media_is_ignored() {
    let h = harness_with(FakeSource::default(), FakeUploader::default(), |c| {
        c.channels = vec![ChannelRule::for_title("Books")];
    })
    .await;
    let message = MessageRef {
        channel_id: books().id,
        message_id: MessageId(1),
        media: None,
    };

    assert!(h.exporter.handle_live_message(&live(books(), message)).await.is_none());
}

#[tokio::test]
async fn live_message_uses_first_matching_rule_and_skips_checkpoint() {
    let h = harness_with(FakeSource::default(), FakeUploader::default(), |c| {
        c.channels = vec![
            ChannelRule::for_title("Boo").with_extensions([".epub"]),
            ChannelRule::for_title("Books").with_extensions([".pdf"]),
        ];
    })
    .await;

    let pdf = h
        .exporter
        .handle_live_message(&live(books(), document(books().id, 1, "a.pdf", 1)))
        .await;
    assert_eq!(
        pdf,
        Some(Outcome::SkippedByPolicy {
            reason: SkipReason::ExtensionNotAllowed
        })
    );

    let epub = h
        .exporter
        .handle_live_message(&live(books(), document(books().id, 2, "b.epub", 1)))
        .await;
    assert_eq!(
        epub,
        Some(Outcome::Uploaded {
            file_name: "b.epub".into()
        })
    );

    let records = h.store.records.lock().unwrap().clone();
    assert_eq!(records[0].source_kind, SourceKind::Listener);
    assert!(h.store.upserts().is_empty());
}

#[tokio::test]
async fn run_listener_drains_until_sender_closes() {
    let h = harness_with(FakeSource::default(), FakeUploader::default(), |c| {
        c.channels = vec![ChannelRule::for_title("Books")];
    })
    .await;
    let (tx, rx) = tokio::sync::mpsc::channel(8);

    for id in 1..=3 {
        tx.send(live(books(), document(books().id, id, &format!("{id}.pdf"), 1)))
            .await
            .unwrap();
    }
    drop(tx);

    h.exporter.run_listener(rx).await;

    assert_eq!(h.store.records.lock().unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn listener_throttle_holds_up_only_the_throttled_message() {
    let news = Channel::new(-200, "News");
    let source = FakeSource {
        channels: vec![books(), news.clone()],
        ..FakeSource::default()
    };
    source
        .download_throttles
        .lock()
        .unwrap()
        .insert(1, (1, Duration::from_secs(30)));
    let h = harness_with(source, FakeUploader::default(), |c| {
        c.channels = vec![ChannelRule::for_title("Books"), ChannelRule::for_title("News")];
    })
    .await;
    let mut events = h.exporter.subscribe();

    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let listener = tokio::spawn({
        let exporter = h.exporter.clone();
        async move { exporter.run_listener(rx).await }
    });
    tx.send(live(books(), document(books().id, 1, "slow.pdf", 1)))
        .await
        .unwrap();
    tx.send(live(news.clone(), document(news.id, 2, "fast.pdf", 1)))
        .await
        .unwrap();

    // Well inside the 30s throttle wait on the Books message
    let first = tokio::time::timeout(
        Duration::from_secs(5),
        wait_for(&mut events, |e| matches!(e, Event::MessageUploaded { .. })),
    )
    .await
    .expect("unthrottled message should not wait behind the throttled one");
    assert!(matches!(
        first,
        Event::MessageUploaded { message_id: MessageId(2), .. }
    ));

    drop(tx);
    listener.await.unwrap();
    assert_eq!(h.store.records.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn listener_abandons_throttled_message_on_shutdown() {
    let source = FakeSource::default();
    source
        .download_throttles
        .lock()
        .unwrap()
        .insert(1, (1, Duration::from_secs(3600)));
    let h = harness_with(source, FakeUploader::default(), |c| {
        c.channels = vec![ChannelRule::for_title("Books")];
    })
    .await;

    let (tx, rx) = tokio::sync::mpsc::channel(8);
    let listener = tokio::spawn({
        let exporter = h.exporter.clone();
        async move { exporter.run_listener(rx).await }
    });
    tx.send(live(books(), document(books().id, 1, "slow.pdf", 1)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    h.exporter.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), listener)
        .await
        .expect("listener should stop on shutdown")
        .unwrap();
    assert!(h.store.records.lock().unwrap().is_empty());
}
