mod support;

use sha2::{Digest, Sha256};
use std::time::Duration;
use support::{Route, TestServer};
use voicestudio::models::{CancelFlag, DownloadEvent, DownloadJob, DownloadState, ModelDownloader};
use voicestudio::DownloadError;

fn downloader() -> ModelDownloader {
    ModelDownloader::with_client(support::client())
}

#[tokio::test]
async fn streams_body_to_destination_with_progress() {
    let body: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let server = TestServer::start(vec![("/amy.onnx", Route::ok(body.clone()))]).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("models/en_US/amy/amy.onnx");

    let job = DownloadJob::new(server.url("/amy.onnx?download=true"), &dest, "Amy");
    let mut handle = downloader().start(job, None, CancelFlag::new());

    let mut progress = Vec::new();
    let mut done = None;
    while let Some(event) = handle.next_event().await {
        match event {
            DownloadEvent::Progress(p) => progress.push(p),
            DownloadEvent::Done(path) => done = Some(path),
            DownloadEvent::Failed(e) => panic!("download failed: {}", e),
        }
    }

    assert_eq!(progress.first(), Some(&0));
    assert_eq!(progress.last(), Some(&100));
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(done.as_deref(), Some(dest.as_path()));
    assert_eq!(handle.job().state, DownloadState::Done);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
    assert!(!dir.path().join("models/en_US/amy/amy.onnx.part").exists());
}

#[tokio::test]
async fn unknown_length_sends_no_progress() {
    let server = TestServer::start(vec![("/cfg.json", Route::ok(&b"{}"[..]).without_length())]).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("cfg.json");

    let mut handle = downloader().start(
        DownloadJob::new(server.url("/cfg.json"), &dest, "config"),
        None,
        CancelFlag::new(),
    );
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }

    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], DownloadEvent::Done(p) if p == &dest));
    assert_eq!(std::fs::read(&dest).unwrap(), b"{}");
}

#[tokio::test]
async fn http_error_leaves_nothing_behind() {
    let server = TestServer::start(vec![]).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("missing.onnx");

    let result = downloader()
        .start(DownloadJob::new(server.url("/missing.onnx"), &dest, "x"), None, CancelFlag::new())
        .finish()
        .await;

    assert!(matches!(result, Err(DownloadError::HttpStatus { status: 404, .. })));
    assert!(!dest.exists());
    assert!(!dir.path().join("missing.onnx.part").exists());
}

#[tokio::test]
async fn empty_body_is_a_failure() {
    let server = TestServer::start(vec![("/empty", Route::ok(Vec::new()))]).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("empty.onnx");

    let result = downloader()
        .start(DownloadJob::new(server.url("/empty"), &dest, "x"), None, CancelFlag::new())
        .finish()
        .await;

    assert!(matches!(result, Err(DownloadError::EmptyBody { .. })));
    assert!(!dest.exists());
}

#[tokio::test]
async fn cancelled_before_start_never_creates_a_file() {
    let server = TestServer::start(vec![("/amy.onnx", Route::ok(vec![1u8; 50_000]))]).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("amy.onnx");

    for _ in 0..3 {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut handle = downloader().start(
            DownloadJob::new(server.url("/amy.onnx"), &dest, "Amy"),
            None,
            cancel,
        );
        let mut last = None;
        while let Some(event) = handle.next_event().await {
            last = Some(event);
        }

        assert!(matches!(last, Some(DownloadEvent::Failed(DownloadError::Cancelled))));
        assert_eq!(handle.job().state, DownloadState::Cancelled);
        assert!(!dest.exists());
        assert!(!dir.path().join("amy.onnx.part").exists());
    }
}

#[tokio::test]
async fn cancel_during_stalled_transfer_cleans_up() {
    let route = Route::ok(vec![9u8; 200_000]).stall_after(50_000);
    let server = TestServer::start(vec![("/slow.onnx", route)]).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("slow.onnx");

    let mut handle = downloader().start(
        DownloadJob::new(server.url("/slow.onnx"), &dest, "slow"),
        None,
        CancelFlag::new(),
    );

    let mut failure = None;
    while let Some(event) = handle.next_event().await {
        match event {
            DownloadEvent::Progress(p) if p > 0 => handle.cancel(),
            DownloadEvent::Progress(_) => {}
            DownloadEvent::Done(_) => panic!("stalled download cannot finish"),
            DownloadEvent::Failed(e) => failure = Some(e),
        }
    }

    assert!(matches!(failure, Some(DownloadError::Cancelled)));
    assert!(!dest.exists());
    assert!(!dir.path().join("slow.onnx.part").exists());
}

#[tokio::test]
async fn cancel_while_waiting_for_headers() {
    let server = TestServer::start(vec![("/mute.onnx", Route::silent())]).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("mute.onnx");

    let handle = downloader().start(
        DownloadJob::new(server.url("/mute.onnx"), &dest, "mute"),
        None,
        CancelFlag::new(),
    );
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle.finish())
        .await
        .expect("cancel was not noticed while waiting for headers");
    assert!(matches!(result, Err(DownloadError::Cancelled)));
    assert!(!dest.exists());
}

#[tokio::test]
async fn checksum_is_verified() {
    let body = b"model bytes".to_vec();
    let good = format!("{:x}", Sha256::digest(&body));
    let server = TestServer::start(vec![("/m.onnx", Route::ok(body.clone()))]).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("m.onnx");

    let bad = downloader()
        .start(
            DownloadJob::new(server.url("/m.onnx"), &dest, "m"),
            Some("00".repeat(32)),
            CancelFlag::new(),
        )
        .finish()
        .await;
    assert!(matches!(bad, Err(DownloadError::Checksum { .. })));
    assert!(!dest.exists());

    let ok = downloader()
        .start(
            DownloadJob::new(server.url("/m.onnx"), &dest, "m"),
            Some(good.to_uppercase()),
            CancelFlag::new(),
        )
        .finish()
        .await
        .unwrap();
    assert_eq!(ok, dest);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
}
