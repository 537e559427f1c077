mod common;

use common::{ChunkFailure, MockApi, RecordingObserver, fast_retry, payload};
use phx_client::{
    IngestApi, MemorySource, NoopObserver, RetryPolicy, SessionClient, Stage, UploadError,
    UploadEvent, UploadScheduler,
};
use phx_core::{ChunkPlan, UploadSession};
use std::time::Duration;

async fn open_session(api: &dyn IngestApi, size: u64, chunk_size: u64) -> UploadSession {
    let plan = ChunkPlan::try_new(size, chunk_size).unwrap();
    SessionClient::new(api)
        .create("test.evtx", &plan)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_every_chunk_uploaded_exactly_once_for_any_concurrency() {
    for concurrency in 1..=5 {
        let api = MockApi::new();
        let source = MemorySource::new(payload(1000));
        let session = open_session(api.as_ref(), 1000, 64).await;

        let acked = UploadScheduler::new(api.as_ref(), &source, concurrency, fast_retry(4))
            .run(&session, &NoopObserver)
            .await
            .unwrap();

        assert_eq!(acked.chunk_count(), 16, "concurrency {concurrency}");
        assert_eq!(acked.bytes(), 1000);
        let successes = api.upload_successes();
        assert_eq!(successes.len(), 16);
        assert!(
            successes.values().all(|&n| n == 1),
            "concurrency {concurrency}: {successes:?}"
        );
        assert!(api.max_in_flight() <= concurrency);
    }
}

#[tokio::test]
async fn test_concurrency_ceiling_is_reached_but_not_exceeded() {
    let api = MockApi::new();
    for index in 0..12 {
        api.delay_chunk(index, Duration::from_millis(20));
    }
    let source = MemorySource::new(payload(12 * 8));
    let session = open_session(api.as_ref(), 12 * 8, 8).await;

    UploadScheduler::new(api.as_ref(), &source, 3, fast_retry(4))
        .run(&session, &NoopObserver)
        .await
        .unwrap();

    assert_eq!(api.max_in_flight(), 3);
}

#[tokio::test]
async fn test_out_of_order_completion_still_acks_all() {
    let api = MockApi::new();
    // Chunk 0 finishes last.
    api.delay_chunk(0, Duration::from_millis(50));
    let source = MemorySource::new(payload(40));
    let session = open_session(api.as_ref(), 40, 10).await;
    let observer = RecordingObserver::default();

    let acked = UploadScheduler::new(api.as_ref(), &source, 4, fast_retry(4))
        .run(&session, &observer)
        .await
        .unwrap();

    assert_eq!(acked.chunk_count(), 4);
    let indices: Vec<u64> = acked.outcomes().iter().map(|o| o.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
    assert_eq!(observer.progress(), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_transient_failure_is_retried_by_same_worker() {
    let api = MockApi::new();
    api.fail_chunk(1, ChunkFailure::Transient(2));
    let source = MemorySource::new(payload(30));
    let session = open_session(api.as_ref(), 30, 10).await;
    let observer = RecordingObserver::default();

    let acked = UploadScheduler::new(api.as_ref(), &source, 2, fast_retry(4))
        .run(&session, &observer)
        .await
        .unwrap();

    assert_eq!(api.upload_attempts(1), 3);
    assert_eq!(acked.retries(), 2);
    let retries: Vec<(u64, u32)> = observer
        .events()
        .into_iter()
        .filter_map(|e| match e {
            UploadEvent::ChunkRetry { index, attempt, .. } => Some((index, attempt)),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![(1, 1), (1, 2)]);
}

#[tokio::test]
async fn test_exhausted_retries_become_fatal() {
    let api = MockApi::new();
    api.fail_chunk(2, ChunkFailure::Transient(10));
    let source = MemorySource::new(payload(30));
    let session = open_session(api.as_ref(), 30, 10).await;

    let err = UploadScheduler::new(api.as_ref(), &source, 1, fast_retry(3))
        .run(&session, &NoopObserver)
        .await
        .unwrap_err();

    match err {
        UploadError::ChunkUpload {
            index, attempts, ..
        } => {
            assert_eq!(index, 2);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(api.upload_attempts(2), 3);
}

#[tokio::test]
async fn test_permanent_failure_stops_dispatch() {
    let api = MockApi::new();
    api.fail_chunk(0, ChunkFailure::Permanent(404));
    let source = MemorySource::new(payload(100));
    let session = open_session(api.as_ref(), 100, 10).await;

    let err = UploadScheduler::new(api.as_ref(), &source, 1, RetryPolicy::none())
        .run(&session, &NoopObserver)
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Stage::Chunk(0));
    assert!(!err.is_transient());
    // A single worker never claims past the failed chunk.
    assert_eq!(api.upload_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_permanent_failure_discards_in_flight_siblings() {
    let api = MockApi::new();
    api.fail_chunk(0, ChunkFailure::Permanent(404));
    api.delay_chunk(1, Duration::from_millis(50));
    api.delay_chunk(2, Duration::from_millis(50));
    let source = MemorySource::new(payload(100));
    let session = open_session(api.as_ref(), 100, 10).await;
    let observer = RecordingObserver::default();

    let err = UploadScheduler::new(api.as_ref(), &source, 3, fast_retry(4))
        .run(&session, &observer)
        .await
        .unwrap_err();

    match err {
        UploadError::ChunkUpload {
            index, attempts, ..
        } => {
            assert_eq!(index, 0);
            assert_eq!(attempts, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    // Chunks 1 and 2 were in flight and still landed on the server.
    assert_eq!(api.upload_attempts(1), 1);
    assert_eq!(api.upload_attempts(2), 1);
    for index in 3..10 {
        assert_eq!(api.upload_attempts(index), 0, "chunk {index} was claimed");
    }
    assert!(observer.progress().is_empty());
}

#[tokio::test]
async fn test_backoff_gives_up_after_sibling_abort() {
    let api = MockApi::new();
    api.fail_chunk(0, ChunkFailure::Permanent(422));
    api.delay_chunk(0, Duration::from_millis(10));
    api.fail_chunk(1, ChunkFailure::Transient(10));
    for index in 2..10 {
        api.delay_chunk(index, Duration::from_millis(30));
    }
    let source = MemorySource::new(payload(100));
    let session = open_session(api.as_ref(), 100, 10).await;
    let observer = RecordingObserver::default();
    let policy = RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(50),
    };

    let err = UploadScheduler::new(api.as_ref(), &source, 3, policy)
        .run(&session, &observer)
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Stage::Chunk(0));
    // Chunk 1 woke from its first backoff to an aborted run.
    assert_eq!(api.upload_attempts(1), 1);
    let retries = observer
        .events()
        .into_iter()
        .filter(|e| matches!(e, UploadEvent::ChunkRetry { .. }))
        .count();
    assert_eq!(retries, 1);
    for index in 3..10 {
        assert_eq!(api.upload_attempts(index), 0, "chunk {index} was claimed");
    }
    assert!(observer.progress().is_empty());
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let api = MockApi::new();
    api.fail_chunk(1, ChunkFailure::Permanent(409));
    let source = MemorySource::new(payload(30));
    let session = open_session(api.as_ref(), 30, 10).await;

    let err = UploadScheduler::new(api.as_ref(), &source, 3, fast_retry(4))
        .run(&session, &NoopObserver)
        .await
        .unwrap_err();

    assert_eq!(err.stage().to_string(), "chunk 1");
    assert_eq!(api.upload_attempts(1), 1);
}

#[tokio::test]
async fn test_empty_session_needs_no_uploads() {
    let api = MockApi::new();
    let source = MemorySource::default();
    let session = open_session(api.as_ref(), 0, 10).await;

    let acked = UploadScheduler::new(api.as_ref(), &source, 3, fast_retry(4))
        .run(&session, &NoopObserver)
        .await
        .unwrap();

    assert_eq!(acked.chunk_count(), 0);
    assert_eq!(api.upload_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_source_length_change_is_rejected() {
    let api = MockApi::new();
    let session = open_session(api.as_ref(), 100, 10).await;
    let source = MemorySource::new(payload(90));

    let err = UploadScheduler::new(api.as_ref(), &source, 2, fast_retry(4))
        .run(&session, &NoopObserver)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        UploadError::SourceChanged {
            expected: 100,
            actual: 90
        }
    ));
}
