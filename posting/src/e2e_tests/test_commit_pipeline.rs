//! Test the background commit pipeline against slow and failing stores.

use std::sync::Arc;
use std::time::Duration;

use crate::commit::CommitPipeline;
use crate::e2e_tests::helpers::{engine_with_config, quiet_pipeline_config};
use crate::storage::{Store, data_key};
use crate::testing::{
    FaultConfig, FaultyStore, GatedStore, new_test_engine_with_store, wait_until,
};
use crate::types::{DirectedEdge, Uid, decode_postings};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_full_queue_blocks_enqueue() {
    let store = Arc::new(GatedStore::new());
    let engine = engine_with_config("friend: uid", store.clone(), quiet_pipeline_config(1, 1));
    for entity in 1..=3 {
        engine
            .add_mutation(&DirectedEdge::set_uid("friend", entity, 100))
            .unwrap();
    }
    let lists = engine.cache().take_dirty(10).unwrap();
    assert_eq!(lists.len(), 3);

    store.close();
    let pipeline = CommitPipeline::start(&engine);

    // The only worker takes the first list and blocks in the store.
    assert!(pipeline.enqueue(Arc::clone(&lists[0])).await.unwrap());
    assert!(wait_until(WAIT, || store.waiting() == 1).await);

    // The second fills the queue; the third has to wait.
    assert!(pipeline.enqueue(Arc::clone(&lists[1])).await.unwrap());
    let blocked =
        tokio::time::timeout(Duration::from_millis(50), pipeline.enqueue(Arc::clone(&lists[2])))
            .await;
    assert!(blocked.is_err(), "enqueue should wait while the queue is full");
    assert!(!lists[2].is_queued());

    store.open();
    assert!(pipeline.enqueue(Arc::clone(&lists[2])).await.unwrap());
    pipeline.shutdown().await;

    assert!(lists.iter().all(|list| list.is_clean()));
    assert_eq!(store.writes(), 3);
}

#[tokio::test]
async fn test_failed_flush_is_retried() {
    let store = Arc::new(FaultyStore::new(7, FaultConfig::no_faults()));
    let engine = new_test_engine_with_store("friend: uid", store.clone());
    engine
        .add_mutation(&DirectedEdge::set_uid("friend", 1, 2))
        .unwrap();
    let list = engine.cache().get(&data_key("friend", Uid(1))).unwrap().unwrap();

    store.set_fail_writes(true);
    let pipeline = CommitPipeline::start(&engine);
    assert!(wait_until(WAIT, || store.injected_faults() >= 2).await);
    assert!(!list.is_clean());
    assert!(pipeline.stats().flush_failures() >= 1);

    store.set_fail_writes(false);
    assert!(wait_until(WAIT, || list.is_clean()).await);
    pipeline.shutdown().await;

    let stored = store.inner().get(list.key()).unwrap().unwrap();
    assert_eq!(decode_postings(&stored).unwrap().len(), 1);
}

#[tokio::test]
async fn test_mutation_during_flush_is_not_lost() {
    let store = Arc::new(GatedStore::new());
    let engine = new_test_engine_with_store("friend: uid", store.clone());
    engine
        .add_mutation(&DirectedEdge::set_uid("friend", 1, 2))
        .unwrap();

    store.close();
    let pipeline = CommitPipeline::start(&engine);
    assert!(wait_until(WAIT, || store.waiting() == 1).await);

    // The list lock is free while the write is held at the gate.
    engine
        .add_mutation(&DirectedEdge::set_uid("friend", 1, 3))
        .unwrap();
    store.open();

    let key = data_key("friend", Uid(1));
    let both_stored = || {
        store
            .get(&key)
            .ok()
            .flatten()
            .and_then(|bytes| decode_postings(&bytes).ok())
            .is_some_and(|postings| postings.len() == 2)
    };
    assert!(wait_until(WAIT, both_stored).await);
    pipeline.shutdown().await;

    assert_eq!(engine.uids_of("friend", 1).unwrap(), [2, 3]);
}

#[tokio::test]
async fn test_shutdown_leaves_unqueued_lists_for_checkpoint() {
    let store = Arc::new(GatedStore::new());
    let engine = engine_with_config("friend: uid", store.clone(), quiet_pipeline_config(1, 4));
    let pipeline = CommitPipeline::start(&engine);
    // Let the immediate first tick pass before mutating.
    tokio::time::sleep(Duration::from_millis(20)).await;

    engine
        .add_mutation(&DirectedEdge::set_uid("friend", 4, 5))
        .unwrap();
    pipeline.shutdown().await;

    assert_eq!(engine.cache().dirty_len().unwrap(), 1);
    let stats = engine.commit_all(10).unwrap();
    assert_eq!(stats.lists_written, 1);
    assert_eq!(store.writes(), 1);
}
