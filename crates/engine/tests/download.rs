mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use cirrus_engine::{EngineConfig, EngineError, TransferOutcome, offline_entry};
use cirrus_protocol::TransferState;
use cirrus_transfer::part_path_for;

use common::{Behavior, descriptor, eventually, fast_config, harness, pattern};

#[tokio::test]
async fn download_reassembles_in_order_and_records_offline_entry() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("nested").join("movie.bin");
    let data = pattern(3000);

    let h = harness(fast_config());
    h.transport.seed("f1", &data, 1024);
    h.transport.set_behavior(Behavior {
        delay: Some(Duration::from_millis(1)),
        ..Behavior::default()
    });

    let handle = h
        .engine
        .enqueue_download(descriptor("f1", "movie.bin", 3000, 1024), &dest)
        .unwrap();
    assert_eq!(handle.wait().await, TransferOutcome::Completed);

    assert_eq!(std::fs::read(&dest).unwrap(), data);
    assert!(!part_path_for(&dest).exists());
    assert_eq!(h.transport.download_calls_for("f1"), 3);

    let entry = offline_entry(h.storage.as_ref(), "f1")
        .await
        .unwrap()
        .expect("offline entry recorded");
    assert_eq!(entry.name, "movie.bin");
    assert_eq!(entry.size, 3000);
    assert_eq!(entry.path, dest);

    let progress = handle.progress();
    assert_eq!(progress.state, TransferState::Completed);
    assert_eq!(progress.bytes_transferred, 3000);
    assert_eq!(progress.chunks_completed, 3);
    assert!(h.engine.active().is_empty());
}

#[tokio::test]
async fn empty_file_downloads_without_requests() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("empty.txt");

    let h = harness(fast_config());
    let handle = h
        .engine
        .enqueue_download(descriptor("f0", "empty.txt", 0, 1024), &dest)
        .unwrap();

    assert_eq!(handle.wait().await, TransferOutcome::Completed);
    assert_eq!(std::fs::read(&dest).unwrap(), Vec::<u8>::new());
    assert_eq!(h.transport.download_calls_for("f0"), 0);
}

#[tokio::test]
async fn duplicate_name_is_rejected_while_active() {
    let dir = tempfile::tempdir().unwrap();

    let h = harness(fast_config());
    h.transport.set_behavior(Behavior {
        hang_downloads_from: Some(0),
        ..Behavior::default()
    });

    let first = h
        .engine
        .enqueue_download(
            descriptor("a1", "song.mp3", 4096, 1024),
            dir.path().join("a.mp3"),
        )
        .unwrap();

    let err = h
        .engine
        .enqueue_download(
            descriptor("b2", "song.mp3", 4096, 1024),
            dir.path().join("b.mp3"),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyDownloading(ref name) if name == "song.mp3"));

    // Give the first job time to run; the rejected one never touches the network.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.transport.download_calls_for("b2"), 0);
    assert_eq!(h.engine.active().len(), 1);

    first.cancel();
    assert_eq!(first.wait().await, TransferOutcome::Cancelled);
}

#[tokio::test]
async fn exhausted_chunk_fails_after_exact_attempt_budget() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("doc.pdf");

    let h = harness(fast_config());
    h.transport.set_behavior(Behavior {
        fail_downloads: true,
        ..Behavior::default()
    });

    let handle = h
        .engine
        .enqueue_download(descriptor("f2", "doc.pdf", 500, 1024), &dest)
        .unwrap();

    match handle.wait().await {
        TransferOutcome::Failed(reason) => {
            assert!(reason.contains("max retries reached for chunk 0"), "{reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(h.transport.download_calls_for("f2"), 32);
    assert!(!dest.exists());
    assert!(!part_path_for(&dest).exists());
    assert!(offline_entry(h.storage.as_ref(), "f2").await.unwrap().is_none());
    assert!(h.engine.progress("f2").is_none());
}

#[tokio::test]
async fn authentication_failure_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("tampered.bin");

    let h = harness(fast_config());
    h.transport.set_behavior(Behavior {
        garbage: true,
        ..Behavior::default()
    });

    let handle = h
        .engine
        .enqueue_download(descriptor("f3", "tampered.bin", 100, 1024), &dest)
        .unwrap();

    match handle.wait().await {
        TransferOutcome::Failed(reason) => assert!(reason.contains("integrity"), "{reason}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(h.transport.download_calls_for("f3"), 1);
    assert!(!part_path_for(&dest).exists());
}

#[tokio::test]
async fn cancel_mid_transfer_removes_partial_output() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("big.iso");

    let h = harness(fast_config());
    h.transport.seed("f4", &pattern(3072), 1024);
    h.transport.set_behavior(Behavior {
        hang_downloads_from: Some(1),
        ..Behavior::default()
    });

    let handle = h
        .engine
        .enqueue_download(descriptor("f4", "big.iso", 3072, 1024), &dest)
        .unwrap();

    let watched = handle.clone();
    eventually(|| {
        let watched = watched.clone();
        async move { watched.progress().chunks_completed >= 1 }
    })
    .await;
    assert_eq!(handle.progress().state, TransferState::Running);

    assert!(h.engine.cancel("f4"));
    let outcome = tokio::time::timeout(Duration::from_secs(2), handle.wait())
        .await
        .expect("cancel blocked on in-flight requests");
    assert_eq!(outcome, TransferOutcome::Cancelled);

    assert!(!dest.exists());
    assert!(!part_path_for(&dest).exists());
    assert!(h.engine.progress("f4").is_none());
    assert!(offline_entry(h.storage.as_ref(), "f4").await.unwrap().is_none());
}

#[tokio::test]
async fn queued_download_can_be_cancelled_before_it_starts() {
    let dir = tempfile::tempdir().unwrap();

    let h = harness(EngineConfig {
        max_concurrent_downloads: 1,
        ..fast_config()
    });
    h.transport.set_behavior(Behavior {
        hang_downloads_from: Some(0),
        ..Behavior::default()
    });

    let running = h
        .engine
        .enqueue_download(
            descriptor("r1", "first.bin", 1024, 1024),
            dir.path().join("first.bin"),
        )
        .unwrap();
    let queued = h
        .engine
        .enqueue_download(
            descriptor("q1", "second.bin", 1024, 1024),
            dir.path().join("second.bin"),
        )
        .unwrap();

    let watched = running.clone();
    eventually(|| {
        let watched = watched.clone();
        async move { watched.progress().state == TransferState::Running }
    })
    .await;
    assert_eq!(queued.progress().state, TransferState::Queued);

    queued.cancel();
    assert_eq!(queued.wait().await, TransferOutcome::Cancelled);
    assert_eq!(h.transport.download_calls_for("q1"), 0);
    assert!(!dir.path().join("second.bin.part").exists());

    running.cancel();
    assert_eq!(running.wait().await, TransferOutcome::Cancelled);
}

#[tokio::test]
async fn progress_never_moves_backwards() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("many.bin");
    let data = pattern(64 * 512);

    let h = harness(fast_config());
    h.transport.seed("f5", &data, 512);
    h.transport.set_behavior(Behavior {
        delay: Some(Duration::from_millis(1)),
        ..Behavior::default()
    });

    let handle = h
        .engine
        .enqueue_download(descriptor("f5", "many.bin", data.len() as u64, 512), &dest)
        .unwrap();

    let watched = handle.clone();
    let sampler = tokio::spawn(async move {
        let mut last_bytes = 0;
        let mut last_chunks = 0;
        loop {
            let p = watched.progress();
            assert!(p.bytes_transferred >= last_bytes);
            assert!(p.chunks_completed >= last_chunks);
            assert!(p.bytes_transferred <= p.bytes_total);
            assert!(p.chunks_completed <= p.total_chunks);
            last_bytes = p.bytes_transferred;
            last_chunks = p.chunks_completed;
            if p.state.is_terminal() {
                return p;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    assert_eq!(handle.wait().await, TransferOutcome::Completed);
    let last = sampler.await.unwrap();
    assert_eq!(last.bytes_transferred, data.len() as u64);
    assert_eq!(last.percentage, 100);
    assert_eq!(std::fs::read(&dest).unwrap(), data);
}

#[tokio::test]
async fn chunk_requests_stay_within_the_download_gate() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(32 * 256);

    let h = harness(EngineConfig {
        max_download_chunk_requests: 4,
        ..fast_config()
    });
    h.transport.seed("f6", &data, 256);
    h.transport.set_behavior(Behavior {
        delay: Some(Duration::from_millis(2)),
        ..Behavior::default()
    });

    let handle = h
        .engine
        .enqueue_download(
            descriptor("f6", "wide.bin", data.len() as u64, 256),
            dir.path().join("wide.bin"),
        )
        .unwrap();
    assert_eq!(handle.wait().await, TransferOutcome::Completed);

    let peak = h.transport.peak_in_flight.load(Ordering::SeqCst);
    assert!((1..=4).contains(&peak), "peak {peak}");
}

#[tokio::test]
async fn download_by_id_resolves_the_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(1500);

    let h = harness(fast_config());
    h.transport.seed("f7", &data, 1024);
    h.api.add_descriptor(descriptor("f7", "scan.png", 1500, 1024));

    let dest = dir.path().join("scan.png");
    let handle = h
        .engine
        .enqueue_download_by_id("f7", &dest)
        .await
        .unwrap();
    assert_eq!(handle.name(), "scan.png");
    assert_eq!(handle.wait().await, TransferOutcome::Completed);
    assert_eq!(std::fs::read(&dest).unwrap(), data);

    let err = h
        .engine
        .enqueue_download_by_id("missing", dir.path().join("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Api(ref msg) if msg == "file not found"));
}

#[tokio::test]
async fn malformed_key_is_rejected_up_front() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(fast_config());

    let mut bad = descriptor("f8", "bad.bin", 10, 1024);
    bad.key = "not-hex".into();
    let err = h
        .engine
        .enqueue_download(bad, dir.path().join("bad.bin"))
        .unwrap_err();
    assert!(matches!(err, EngineError::Key(_)));
    assert!(h.engine.active().is_empty());
}

#[tokio::test]
async fn preview_fetches_only_the_first_chunk() {
    let h = harness(fast_config());
    let data = pattern(3000);
    h.transport.seed("p1", &data, 1024);

    let preview = h
        .engine
        .fetch_preview(descriptor("p1", "thumb.jpg", 3000, 1024))
        .await
        .unwrap();
    assert_eq!(preview.as_slice(), &data[..1024]);
    assert_eq!(*h.transport.download_calls.lock().unwrap(), vec![("p1".to_string(), 0)]);
    assert!(h.engine.active().is_empty());

    let empty = h
        .engine
        .fetch_preview(descriptor("p2", "blank.jpg", 0, 1024))
        .await
        .unwrap();
    assert!(empty.is_empty());
    assert_eq!(h.transport.download_calls_for("p2"), 0);
}
