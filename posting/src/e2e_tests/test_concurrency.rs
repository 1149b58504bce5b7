//! Test indexed mutations from many threads at once.

use std::sync::Arc;

use crate::e2e_tests::helpers::{index_entries, set_name};
use crate::testing::new_test_engine;
use crate::types::Value;

#[test]
fn test_threads_on_distinct_entities() {
    let engine = new_test_engine("name: string @index");

    let handles: Vec<_> = (1..=8u64)
        .map(|entity| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                for round in 0..50 {
                    let name = if round % 2 == 0 { "even" } else { "odd" };
                    engine
                        .add_mutation_with_index(&set_name(entity, name))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    while engine.commit_all(100).unwrap().lists_written > 0 {}

    // Every thread ends on round 49, an odd round.
    assert_eq!(
        index_entries(engine.store(), "name"),
        vec![(b"\x01odd".to_vec(), (1..=8).collect())]
    );
    for entity in 1..=8 {
        assert_eq!(
            engine.value_of("name", entity).unwrap(),
            Some(Value::String("odd".to_string()))
        );
    }
}

#[test]
fn test_threads_contending_on_one_entity() {
    let engine = new_test_engine("name: string @index");

    let handles: Vec<_> = ["a", "b", "c", "d"]
        .into_iter()
        .map(|name| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                for _ in 0..25 {
                    engine.add_mutation_with_index(&set_name(42, name)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    engine.commit_all(100).unwrap();

    // Whatever value won, the index holds exactly that one token.
    let Some(Value::String(winner)) = engine.value_of("name", 42).unwrap() else {
        panic!("entity 42 should hold a string");
    };
    let mut token = vec![0x01];
    token.extend_from_slice(winner.as_bytes());
    assert_eq!(index_entries(engine.store(), "name"), vec![(token, vec![42])]);
}
