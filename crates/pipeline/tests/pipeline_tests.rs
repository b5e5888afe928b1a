//! Integration tests for the pipeline stages.

mod common;

use barge_core::{
    AggregateId, AggregateState, AggregatorConfig, Buffer, BufferedPiece, ContentHash, PieceInfo,
    PieceLink, PiecePolicy,
};
use barge_pipeline::{
    Accumulator, AggregateRef, BufferRecord, MemoryPointerStore, MemoryQueue, OfferWorkflow,
    PipelineError, PointerStore, ReduceDestination, Reducer,
};
use common::{FailingQueue, MockBroker, TestEnv};
use std::sync::Arc;

fn info(seed: &str, size: u64) -> PieceInfo {
    PieceInfo::new(PieceLink::compute(seed.as_bytes()), size)
}

fn buffered(seed: &str, size: u64) -> BufferedPiece {
    BufferedPiece {
        link: PieceLink::compute(seed.as_bytes()),
        size,
        policy: PiecePolicy::Insert,
    }
}

fn small_config() -> AggregatorConfig {
    AggregatorConfig {
        min_size: 50,
        max_size: 100,
        max_route_attempts: 8,
    }
}

#[tokio::test]
async fn test_route_creates_aggregate_and_installs_pointer() {
    let env = TestEnv::new().await;
    let pointers = Arc::new(MemoryPointerStore::new());
    let accumulator = Accumulator::new(env.records.clone(), pointers.clone(), small_config());

    let id = accumulator
        .route("store-a", &[info("a", 30)])
        .await
        .expect("route");

    assert_eq!(pointers.get("store-a").await.unwrap(), Some(id));
    let aggregate = env
        .records
        .get_aggregate(id)
        .await
        .expect("get")
        .expect("row");
    assert_eq!(aggregate.size, 30);
    assert_eq!(aggregate.state, AggregateState::Ingesting);
}

#[tokio::test]
async fn test_route_reuses_pointer_until_full_then_rolls_over() {
    let env = TestEnv::new().await;
    let pointers = Arc::new(MemoryPointerStore::new());
    let accumulator = Accumulator::new(env.records.clone(), pointers.clone(), small_config());

    let first = accumulator
        .route("store-a", &[info("a", 60)])
        .await
        .expect("route");
    let same = accumulator
        .route("store-a", &[info("b", 30)])
        .await
        .expect("route");
    assert_eq!(first, same);

    // 90 + 50 > 100: this batch must land in a fresh aggregate.
    let second = accumulator
        .route("store-a", &[info("c", 50)])
        .await
        .expect("route");
    assert_ne!(first, second);
    assert_eq!(pointers.get("store-a").await.unwrap(), Some(second));

    let first_aggregate = env
        .records
        .get_aggregate(first)
        .await
        .expect("get")
        .expect("row");
    let second_aggregate = env
        .records
        .get_aggregate(second)
        .await
        .expect("get")
        .expect("row");
    assert_eq!(first_aggregate.size, 90);
    assert_eq!(second_aggregate.size, 50);
}

#[tokio::test]
async fn test_route_rejects_oversized_batch_without_mutation() {
    let env = TestEnv::new().await;
    let pointers = Arc::new(MemoryPointerStore::new());
    let accumulator = Accumulator::new(env.records.clone(), pointers.clone(), small_config());

    let err = accumulator
        .route("store-a", &[info("huge", 101)])
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
}

#[tokio::test]
async fn test_route_rolls_over_after_aggregate_leaves_ingesting() {
    let env = TestEnv::new().await;
    let pointers = Arc::new(MemoryPointerStore::new());
    let accumulator = Accumulator::new(env.records.clone(), pointers.clone(), small_config());

    let first = accumulator
        .route("store-a", &[info("a", 60)])
        .await
        .expect("route");
    env.records.set_as_ready(first, 50).await.expect("ready");

    // Pointer is stale; routing must converge on a fresh aggregate.
    let second = accumulator
        .route("store-a", &[info("b", 10)])
        .await
        .expect("route");
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_concurrent_routing_never_oversizes_or_loses_pieces() {
    let env = TestEnv::new().await;
    let pointers = Arc::new(MemoryPointerStore::new());
    let accumulator = Arc::new(Accumulator::new(
        env.records.clone(),
        pointers.clone(),
        small_config(),
    ));

    let mut handles = Vec::new();
    for i in 0..8 {
        let accumulator = accumulator.clone();
        handles.push(tokio::spawn(async move {
            let batch = [info(&format!("piece-{i}"), 30)];
            accumulator.route("store-a", &batch).await
        }));
    }

    let mut used = std::collections::HashSet::new();
    for handle in handles {
        let id = handle.await.expect("join").expect("route");
        used.insert(id.to_string());
    }

    // Every accepted batch is durably in some aggregate, none oversize.
    let mut total = 0_u64;
    for id in &used {
        let aggregate = env
            .records
            .get_aggregate(AggregateId::parse(id).unwrap())
            .await
            .expect("get")
            .expect("row");
        assert!(aggregate.size <= 100, "aggregate oversize: {}", aggregate.size);
        total += aggregate.size;
    }
    assert_eq!(total, 8 * 30);
}

#[tokio::test]
async fn test_reducer_merges_and_enqueues_aggregate_reference() {
    let env = TestEnv::new().await;
    let buffer_queue = Arc::new(MemoryQueue::new());
    let aggregate_queue = Arc::new(MemoryQueue::new());
    let reducer = Reducer::new(
        env.buffers.clone(),
        buffer_queue.clone(),
        aggregate_queue.clone(),
        50,
    );

    let first = Buffer::new(
        "store-a",
        (0..100).map(|i| buffered(&format!("a{i}"), 1)).collect(),
    );
    let second = Buffer::new(
        "store-a",
        (0..100).map(|i| buffered(&format!("b{i}"), 1)).collect(),
    );
    let first_hash = env.buffers.store(&first).await.expect("store");
    let second_hash = env.buffers.store(&second).await.expect("store");

    let outcome = reducer
        .reduce(&[
            BufferRecord {
                buffer: first_hash,
                group: "store-a".to_string(),
            },
            BufferRecord {
                buffer: second_hash,
                group: "store-a".to_string(),
            },
        ])
        .await
        .expect("reduce");

    assert_eq!(outcome.total_size, 200);
    assert_eq!(outcome.destination, ReduceDestination::Aggregate);

    // Exactly one downstream reference, pointing at the merged buffer.
    let messages = aggregate_queue.drain("store-a");
    assert_eq!(messages.len(), 1);
    assert!(buffer_queue.is_empty());

    let reference = BufferRecord::decode(&messages[0]).expect("decode");
    assert_eq!(reference.buffer, outcome.buffer);
    assert_eq!(reference.group, "store-a");

    let merged = env.buffers.fetch(&outcome.buffer).await.expect("fetch");
    assert_eq!(merged.pieces.len(), 200);
    assert_eq!(merged.group, "store-a");
}

#[tokio::test]
async fn test_reducer_requeues_small_merge_on_buffer_queue() {
    let env = TestEnv::new().await;
    let buffer_queue = Arc::new(MemoryQueue::new());
    let aggregate_queue = Arc::new(MemoryQueue::new());
    let reducer = Reducer::new(
        env.buffers.clone(),
        buffer_queue.clone(),
        aggregate_queue.clone(),
        1000,
    );

    let buffer = Buffer::new("store-a", vec![buffered("a", 10), buffered("b", 20)]);
    let hash = env.buffers.store(&buffer).await.expect("store");

    let outcome = reducer
        .reduce(&[BufferRecord {
            buffer: hash,
            group: "store-a".to_string(),
        }])
        .await
        .expect("reduce");

    assert_eq!(outcome.destination, ReduceDestination::Buffer);
    assert_eq!(buffer_queue.drain("store-a").len(), 1);
    assert!(aggregate_queue.is_empty());
}

#[tokio::test]
async fn test_reducer_fails_fast_on_missing_buffer() {
    let env = TestEnv::new().await;
    let buffer_queue = Arc::new(MemoryQueue::new());
    let aggregate_queue = Arc::new(MemoryQueue::new());
    let reducer = Reducer::new(
        env.buffers.clone(),
        buffer_queue.clone(),
        aggregate_queue.clone(),
        50,
    );

    let stored = Buffer::new("store-a", vec![buffered("a", 10)]);
    let stored_hash = env.buffers.store(&stored).await.expect("store");
    let missing = ContentHash::compute(b"never stored");

    let err = reducer
        .reduce(&[
            BufferRecord {
                buffer: stored_hash,
                group: "store-a".to_string(),
            },
            BufferRecord {
                buffer: missing,
                group: "store-a".to_string(),
            },
        ])
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NotFound(_)));
    assert!(buffer_queue.is_empty());
    assert!(aggregate_queue.is_empty());
}

#[tokio::test]
async fn test_reducer_enqueue_failure_keeps_merged_buffer_stored() {
    let env = TestEnv::new().await;
    let reducer = Reducer::new(
        env.buffers.clone(),
        Arc::new(FailingQueue),
        Arc::new(FailingQueue),
        50,
    );

    let buffer = Buffer::new("store-a", (0..60).map(|i| buffered(&format!("p{i}"), 1)).collect());
    let hash = env.buffers.store(&buffer).await.expect("store");
    let record = BufferRecord {
        buffer: hash,
        group: "store-a".to_string(),
    };

    let err = reducer.reduce(&[record.clone()]).await.unwrap_err();
    assert!(matches!(err, PipelineError::QueueFailed(_)));

    // The merged buffer survived the queue failure; a retry against a
    // working queue finds it already stored and succeeds.
    let aggregate_queue = Arc::new(MemoryQueue::new());
    let retry = Reducer::new(
        env.buffers.clone(),
        Arc::new(MemoryQueue::new()),
        aggregate_queue.clone(),
        50,
    );
    let outcome = retry.reduce(&[record]).await.expect("retry reduce");
    assert!(env.buffers.exists(&outcome.buffer).await.expect("exists"));
    assert_eq!(aggregate_queue.drain("store-a").len(), 1);
}

#[tokio::test]
async fn test_reducer_rejects_empty_batch() {
    let env = TestEnv::new().await;
    let reducer = Reducer::new(
        env.buffers.clone(),
        Arc::new(MemoryQueue::new()),
        Arc::new(MemoryQueue::new()),
        50,
    );

    let err = reducer.reduce(&[]).await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
}

#[tokio::test]
async fn test_offer_invokes_broker_with_piece_links() {
    let env = TestEnv::new().await;
    let broker = Arc::new(MockBroker::new());
    let workflow = OfferWorkflow::new(env.buffers.clone(), broker.clone());

    let buffer = Buffer::new("store-a", vec![buffered("a", 10), buffered("b", 20)]);
    let hash = env.buffers.store(&buffer).await.expect("store");

    let acks = workflow
        .offer(&AggregateRef {
            aggregate: AggregateId::new(),
            buffer: hash,
            group: "store-a".to_string(),
        })
        .await
        .expect("offer");

    assert_eq!(acks, 2);
    let offers = broker.offers.lock().unwrap();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].buffer, hash);
    assert_eq!(offers[0].pieces.len(), 2);
    assert_eq!(offers[0].group, "store-a");
}

#[tokio::test]
async fn test_offer_missing_buffer_never_reaches_broker() {
    let env = TestEnv::new().await;
    let broker = Arc::new(MockBroker::new());
    let workflow = OfferWorkflow::new(env.buffers.clone(), broker.clone());

    let err = workflow
        .offer(&AggregateRef {
            aggregate: AggregateId::new(),
            buffer: ContentHash::compute(b"missing"),
            group: "store-a".to_string(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NotFound(_)));
    assert_eq!(broker.offer_count(), 0);
}

#[tokio::test]
async fn test_offer_broker_failure_is_retryable() {
    let env = TestEnv::new().await;
    let broker = Arc::new(MockBroker::new());
    let workflow = OfferWorkflow::new(env.buffers.clone(), broker.clone());

    let buffer = Buffer::new("store-a", vec![buffered("a", 10)]);
    let hash = env.buffers.store(&buffer).await.expect("store");
    let record = AggregateRef {
        aggregate: AggregateId::new(),
        buffer: hash,
        group: "store-a".to_string(),
    };

    broker.set_failing(true);
    let err = workflow.offer(&record).await.unwrap_err();
    assert!(matches!(err, PipelineError::OperationFailed(_)));
    assert_eq!(broker.offer_count(), 0);

    // No local mutation happened; the retry is a fresh attempt.
    broker.set_failing(false);
    let acks = workflow.offer(&record).await.expect("offer");
    assert_eq!(acks, 1);
}
