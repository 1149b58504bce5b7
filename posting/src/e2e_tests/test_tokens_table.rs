//! Test that indexed string mutations land in the tokens table.

use crate::e2e_tests::helpers::{index_entries, set_name};
use crate::testing::new_test_engine;
use crate::types::{DirectedEdge, Value};

#[test]
fn test_indexed_string_writes_token_entry() {
    let engine = new_test_engine("name: string @index");

    assert!(engine.add_mutation_with_index(&set_name(157, "david")).unwrap());
    engine.commit_all(10).unwrap();

    assert_eq!(
        index_entries(engine.store(), "name"),
        vec![(b"\x01david".to_vec(), vec![157])]
    );
}

#[test]
fn test_overwrite_moves_entry_to_new_token() {
    let engine = new_test_engine("name: string @index");

    engine.add_mutation_with_index(&set_name(157, "david")).unwrap();
    engine.commit_all(10).unwrap();
    engine.add_mutation_with_index(&set_name(157, "Daniel")).unwrap();
    engine.commit_all(10).unwrap();

    // The emptied "david" list is deleted rather than stored empty.
    assert_eq!(
        index_entries(engine.store(), "name"),
        vec![(b"\x01daniel".to_vec(), vec![157])]
    );
    assert_eq!(
        engine.value_of("name", 157).unwrap(),
        Some(Value::String("Daniel".to_string()))
    );
}

#[test]
fn test_case_variants_share_a_token() {
    let engine = new_test_engine("name: string @index");

    engine.add_mutation_with_index(&set_name(1, "Ann")).unwrap();
    engine.add_mutation_with_index(&set_name(2, "ANN")).unwrap();
    engine.commit_all(10).unwrap();

    assert_eq!(
        index_entries(engine.store(), "name"),
        vec![(b"\x01ann".to_vec(), vec![1, 2])]
    );
}

#[test]
fn test_delete_clears_token_entry() {
    let engine = new_test_engine("name: string @index");

    engine.add_mutation_with_index(&set_name(5, "rick")).unwrap();
    engine.commit_all(10).unwrap();
    engine
        .add_mutation_with_index(&DirectedEdge::delete_value(
            "name",
            5,
            Value::String("rick".to_string()),
        ))
        .unwrap();
    engine.commit_all(10).unwrap();

    assert!(index_entries(engine.store(), "name").is_empty());
    assert_eq!(engine.value_of("name", 5).unwrap(), None);
}

#[test]
fn test_int_tokens_follow_value_order() {
    let engine = new_test_engine("age: int @index");

    for (entity, age) in [(1, 40), (2, -3), (3, 7)] {
        engine
            .add_mutation_with_index(&DirectedEdge::set_value("age", entity, Value::Int(age)))
            .unwrap();
    }
    engine.commit_all(10).unwrap();

    let entities: Vec<Vec<u64>> = index_entries(engine.store(), "age")
        .into_iter()
        .map(|(_, uids)| uids)
        .collect();
    assert_eq!(entities, vec![vec![2], vec![3], vec![1]]);
}
