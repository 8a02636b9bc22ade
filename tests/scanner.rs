mod common;

use anyhow::{bail, Result};
use std::collections::VecDeque;

use common::{log_leaf, FakeBackend, Script, LOG_ID};
use gossip_hub::backend::{BackendError, Code, LogLeaf};
use gossip_hub::scanner::{scan, LeafConsumer, ScanError, CHUNK_SIZE};

/// Records every index it is handed
#[derive(Default)]
struct Recorder {
    seen: Vec<u64>,
}

impl LeafConsumer for Recorder {
    fn consume(&mut self, index: u64, leaf: &LogLeaf) -> Result<()> {
        assert_eq!(leaf.leaf_index, index);
        self.seen.push(index);
        Ok(())
    }
}

#[tokio::test]
async fn test_scan_visits_every_leaf_in_order() -> Result<()> {
    let backend = FakeBackend::with_leaves(25);
    let mut recorder = Recorder::default();

    let delivered = scan(backend.as_ref(), LOG_ID, &mut recorder).await?;

    assert_eq!(delivered, 25);
    assert_eq!(recorder.seen, (0..25).collect::<Vec<_>>());
    assert_eq!(
        *backend.range_requests.lock(),
        vec![(0, CHUNK_SIZE), (10, CHUNK_SIZE), (20, CHUNK_SIZE)]
    );
    Ok(())
}

#[tokio::test]
async fn test_scan_empty_log() -> Result<()> {
    let backend = FakeBackend::with_leaves(0);
    let mut recorder = Recorder::default();
    assert_eq!(scan(backend.as_ref(), LOG_ID, &mut recorder).await?, 0);
    assert!(recorder.seen.is_empty());
    // Only the head was read
    assert_eq!(backend.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_scan_downward_skew_stops_early() -> Result<()> {
    let backend = FakeBackend::new(Script {
        tree_size: Some(25),
        leaves: (0..25).map(log_leaf).collect(),
        // The second read revises the size below the cursor
        revisions: VecDeque::from([None, Some(5)]),
        ..Script::default()
    });
    let mut recorder = Recorder::default();

    let delivered = scan(backend.as_ref(), LOG_ID, &mut recorder).await?;

    assert_eq!(delivered, 10);
    assert_eq!(recorder.seen, (0..10).collect::<Vec<_>>());
    assert_eq!(backend.range_requests.lock().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_scan_downward_skew_within_chunk() -> Result<()> {
    let backend = FakeBackend::new(Script {
        tree_size: Some(25),
        leaves: (0..25).map(log_leaf).collect(),
        revisions: VecDeque::from([None, Some(13)]),
        ..Script::default()
    });
    let mut recorder = Recorder::default();

    let delivered = scan(backend.as_ref(), LOG_ID, &mut recorder).await?;

    assert_eq!(delivered, 13);
    assert_eq!(recorder.seen, (0..13).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test]
async fn test_scan_upward_skew_extends_scan() -> Result<()> {
    let backend = FakeBackend::new(Script {
        tree_size: Some(12),
        leaves: (0..30).map(log_leaf).collect(),
        revisions: VecDeque::from([Some(30)]),
        ..Script::default()
    });
    let mut recorder = Recorder::default();

    assert_eq!(scan(backend.as_ref(), LOG_ID, &mut recorder).await?, 30);
    assert_eq!(recorder.seen.len(), 30);
    Ok(())
}

#[tokio::test]
async fn test_scan_aborts_on_empty_read() {
    let backend = FakeBackend::new(Script {
        tree_size: Some(25),
        leaves: (0..25).map(log_leaf).collect(),
        empty_from: Some(10),
        ..Script::default()
    });
    let mut recorder = Recorder::default();

    let err = scan(backend.as_ref(), LOG_ID, &mut recorder)
        .await
        .expect_err("empty read below tree size is fatal");

    assert!(matches!(
        err,
        ScanError::NoProgress {
            index: 10,
            tree_size: 25
        }
    ));
    assert_eq!(recorder.seen.len(), 10);
    // No retry after the empty read
    assert_eq!(backend.range_requests.lock().len(), 2);
}

#[tokio::test]
async fn test_scan_aborts_on_missing_leaf() {
    let backend = FakeBackend::new(Script {
        tree_size: Some(3),
        range_override: Some(vec![Some(log_leaf(0)), None, Some(log_leaf(2))]),
        ..Script::default()
    });
    let mut recorder = Recorder::default();

    let err = scan(backend.as_ref(), LOG_ID, &mut recorder)
        .await
        .expect_err("absent leaf is fatal");

    assert!(matches!(err, ScanError::MissingLeaf { index: 1 }));
    assert_eq!(recorder.seen, vec![0]);
}

#[tokio::test]
async fn test_scan_propagates_consumer_error() {
    let backend = FakeBackend::with_leaves(25);
    let mut seen = Vec::new();
    let mut consumer = |index: u64, _leaf: &LogLeaf| -> Result<()> {
        if index == 7 {
            bail!("refusing leaf {index}");
        }
        seen.push(index);
        Ok(())
    };

    let err = scan(backend.as_ref(), LOG_ID, &mut consumer)
        .await
        .expect_err("consumer error stops the scan");

    assert!(matches!(err, ScanError::Consumer { index: 7, .. }));
    assert!(err.to_string().contains("refusing leaf 7"));
    assert_eq!(seen, (0..7).collect::<Vec<_>>());
    assert_eq!(backend.range_requests.lock().len(), 1);
}

#[tokio::test]
async fn test_scan_backend_failures() {
    let failing = FakeBackend::new(Script {
        error: Some(BackendError::status(Code::Unavailable, "down")),
        ..Script::default()
    });
    let err = scan(failing.as_ref(), LOG_ID, &mut Recorder::default())
        .await
        .expect_err("backend failure");
    assert!(matches!(
        err,
        ScanError::Backend {
            op: "GetLatestSignedLogRoot",
            ..
        }
    ));

    let rootless = FakeBackend::new(Script::default());
    let err = scan(rootless.as_ref(), LOG_ID, &mut Recorder::default())
        .await
        .expect_err("no root");
    assert!(matches!(err, ScanError::MissingRoot));
}
