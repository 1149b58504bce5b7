//! Common helpers for end-to-end tests.

use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::schema::Schema;
use crate::storage::{ParsedKey, Store, index_prefix};
use crate::types::{DirectedEdge, Value, decode_postings};

/// Edge that sets the `name` of `entity`.
pub fn set_name(entity: u64, name: &str) -> DirectedEdge {
    DirectedEdge::set_value("name", entity, Value::String(name.to_string()))
}

/// Every stored index entry of `attribute` as `(token bytes, entities)`, in
/// key order.
pub fn index_entries(store: &dyn Store, attribute: &str) -> Vec<(Vec<u8>, Vec<u64>)> {
    store
        .scan_prefix(&index_prefix(attribute))
        .unwrap()
        .into_iter()
        .map(|(key, value)| {
            let parsed = ParsedKey::parse(&key).unwrap();
            let token = parsed.token().unwrap().as_bytes().to_vec();
            let uids = decode_postings(&value)
                .unwrap()
                .iter()
                .map(|p| p.uid().0)
                .collect();
            (token, uids)
        })
        .collect()
}

/// Pipeline configuration that never ticks on its own within a test.
pub const fn quiet_pipeline_config(workers: usize, capacity: usize) -> EngineConfig {
    EngineConfig {
        commit_workers: workers,
        commit_queue_capacity: capacity,
        commit_interval: Duration::from_secs(3600),
        commit_batch_size: 100,
        cache_soft_limit: 1000,
    }
}

/// Create an engine over `store` with an explicit configuration.
pub fn engine_with_config(schema: &str, store: Arc<dyn Store>, config: EngineConfig) -> Arc<Engine> {
    let schema = Schema::parse(schema).unwrap();
    Engine::new(store, Arc::new(schema), config)
}
