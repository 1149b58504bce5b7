//! Test that an index rebuild repairs a stale index.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::e2e_tests::helpers::{index_entries, set_name};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::storage::{MemoryStore, Store, index_key};
use crate::testing::{GatedStore, new_test_engine_with_store};
use crate::tokenizer::Token;

fn engine_with_stray_entries() -> Arc<Engine> {
    stray_entries_over(Arc::new(MemoryStore::new()))
}

fn stray_entries_over(store: Arc<dyn Store>) -> Arc<Engine> {
    let engine = new_test_engine_with_store("name: string @index", store);

    // Plain mutations leave the index untouched.
    engine.add_mutation(&set_name(1, "Michonne")).unwrap();
    engine.add_mutation(&set_name(20, "David")).unwrap();
    engine.commit_all(10).unwrap();

    for stray in ["wrongname1", "wrongname2"] {
        let token = Token::from_bytes(stray.as_bytes().to_vec());
        engine
            .store()
            .set(&index_key("name", &token), b"nothing")
            .unwrap();
    }
    engine
}

#[test]
fn test_rebuild_replaces_stray_entries() {
    let engine = engine_with_stray_entries();

    let stats = engine
        .rebuild_index("name", &CancellationToken::new())
        .unwrap();
    engine.commit_all(10).unwrap();

    assert_eq!(stats.entities_scanned, 2);
    assert_eq!(stats.tokens_written, 2);
    assert_eq!(stats.tokens_deleted, 2);
    assert_eq!(
        index_entries(engine.store(), "name"),
        vec![
            (b"\x01david".to_vec(), vec![20]),
            (b"\x01michonne".to_vec(), vec![1]),
        ]
    );
}

#[test]
fn test_second_rebuild_writes_nothing() {
    let engine = engine_with_stray_entries();
    let cancel = CancellationToken::new();

    engine.rebuild_index("name", &cancel).unwrap();
    let before = index_entries(engine.store(), "name");
    let stats = engine.rebuild_index("name", &cancel).unwrap();

    assert_eq!(stats.tokens_written, 0);
    assert_eq!(stats.tokens_deleted, 0);
    assert_eq!(index_entries(engine.store(), "name"), before);
}

#[test]
fn test_cancelled_rebuild_writes_nothing() {
    let engine = engine_with_stray_entries();
    let before = engine.store().scan_prefix(&[]).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(
        engine.rebuild_index("name", &cancel),
        Err(EngineError::Cancelled)
    ));

    assert_eq!(engine.store().scan_prefix(&[]).unwrap(), before);
}

#[test]
fn test_indexed_mutations_after_rebuild_stay_consistent() {
    let engine = engine_with_stray_entries();
    engine
        .rebuild_index("name", &CancellationToken::new())
        .unwrap();

    engine.add_mutation_with_index(&set_name(20, "Daryl")).unwrap();
    engine.commit_all(10).unwrap();

    assert_eq!(
        index_entries(engine.store(), "name"),
        vec![
            (b"\x01daryl".to_vec(), vec![20]),
            (b"\x01michonne".to_vec(), vec![1]),
        ]
    );
}

#[test]
fn test_rebuild_holds_off_indexed_mutations() {
    let store = Arc::new(GatedStore::new());
    let engine = stray_entries_over(Arc::clone(&store) as Arc<dyn Store>);

    // Hold the rebuild in its write phase.
    store.close();
    let rebuild = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || engine.rebuild_index("name", &CancellationToken::new()))
    };
    while store.waiting() == 0 {
        std::thread::yield_now();
    }

    let applied = Arc::new(AtomicBool::new(false));
    let mutation = {
        let engine = Arc::clone(&engine);
        let applied = Arc::clone(&applied);
        std::thread::spawn(move || {
            let recorded = engine.add_mutation_with_index(&set_name(20, "Daryl"));
            applied.store(true, Ordering::SeqCst);
            recorded
        })
    };
    std::thread::sleep(Duration::from_millis(50));
    assert!(!applied.load(Ordering::SeqCst));

    store.open();
    rebuild.join().unwrap().unwrap();
    assert!(mutation.join().unwrap().unwrap());
    engine.commit_all(10).unwrap();

    assert_eq!(
        index_entries(engine.store(), "name"),
        vec![
            (b"\x01daryl".to_vec(), vec![20]),
            (b"\x01michonne".to_vec(), vec![1]),
        ]
    );
}
