//! The posting-list engine: mutation entry points, the indexed-mutation
//! coordinator, and synchronous checkpoints.
//!
//! # Lock Order
//!
//! 1. The attribute lock (`RwLock<()>` per attribute): indexed mutations take
//!    it shared, the index rebuilder takes it exclusive.
//! 2. Posting-list mutexes, in ascending encoded-key order. Data keys sort
//!    before every index key, so a coordinator locks its data list first and
//!    then the index lists it touches.
//!
//! Commit workers lock one list at a time and never hold a list lock across a
//! store call.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::list::{FlushOutcome, ListCache, PostingList};
use crate::schema::{AttributeSchema, Schema};
use crate::storage::{Store, data_key, index_key};
use crate::tokenizer::{Token, tokenize};
use crate::types::{
    DirectedEdge, Op, Posting, Target, Uid, Value, ValueType, validate_attribute,
};

/// Counters reported by `Engine::commit_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitStats {
    /// Lists whose resolved view was written.
    pub lists_written: usize,
    /// Dirty keys whose list needed no write.
    pub lists_skipped: usize,
}

/// Posting-list engine over one store.
pub struct Engine {
    pub(crate) cache: Arc<ListCache>,
    pub(crate) schema: Arc<Schema>,
    config: EngineConfig,
    clock: Clock,
    attribute_locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl Engine {
    /// Create an engine over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, schema: Arc<Schema>, config: EngineConfig) -> Arc<Self> {
        Self::with_clock(store, schema, config, Clock::default())
    }

    /// Create an engine that stamps mutations from `clock`.
    #[must_use]
    pub fn with_clock(
        store: Arc<dyn Store>,
        schema: Arc<Schema>,
        config: EngineConfig,
        clock: Clock,
    ) -> Arc<Self> {
        tracing::info!(
            "Starting posting engine: {} attributes, {} commit workers",
            schema.attributes().len(),
            config.commit_workers
        );
        Arc::new(Self {
            cache: Arc::new(ListCache::new(store)),
            schema,
            config,
            clock,
            attribute_locks: Mutex::new(HashMap::new()),
        })
    }

    /// The shared list cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<ListCache> {
        &self.cache
    }

    /// The attribute schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.cache.store()
    }

    /// Index tokens of `value` under `attribute`'s declared type.
    pub fn tokenize(&self, attribute: &str, value: &Value) -> Result<Vec<Token>, EngineError> {
        validate_attribute(attribute).map_err(EngineError::InvalidAttribute)?;
        let value_type = self
            .schema
            .type_of(attribute)
            .ok_or_else(|| EngineError::UnknownAttribute(attribute.to_string()))?;
        Ok(tokenize(value_type, value)?)
    }

    /// Apply `edge` to its data list only.
    ///
    /// Values of attributes in the schema are converted to the declared type
    /// first. Attributes outside the schema are stored as given. Returns
    /// whether the mutation was recorded.
    pub fn add_mutation(&self, edge: &DirectedEdge) -> Result<bool, EngineError> {
        edge.validate().map_err(EngineError::InvalidEdge)?;
        let edge = self.normalize(edge, self.schema.get(&edge.attribute))?;
        let ts = self.timestamp_for(&edge);

        let key = data_key(&edge.attribute, edge.entity);
        let list = self.cache.get_or_create(&key)?;
        let recorded = list.add_mutation(&edge, ts)?;
        if recorded {
            self.cache.mark_dirty(&key)?;
        }
        Ok(recorded)
    }

    /// Apply `edge` to its data list and keep the attribute's value index in
    /// step with it.
    ///
    /// Every fallible step happens before the first list is modified, so
    /// either the data list and all affected index lists change or nothing
    /// does. Edges of attributes without an index, and uid edges, go through
    /// `add_mutation`.
    ///
    /// # Pre-conditions
    ///
    /// - `edge.attribute` is in the schema
    ///
    /// # Post-conditions
    ///
    /// - For every token of the prior value not produced by the new value,
    ///   the token's list holds a `Delete` for the entity
    /// - For every token of the new value not produced by the prior value,
    ///   the token's list holds a `Set` for the entity
    /// - Every touched list is in the dirty set
    #[allow(clippy::significant_drop_tightening)] // guards are held until every list is updated
    pub fn add_mutation_with_index(&self, edge: &DirectedEdge) -> Result<bool, EngineError> {
        edge.validate().map_err(EngineError::InvalidEdge)?;
        let attr_schema = self
            .schema
            .get(&edge.attribute)
            .ok_or_else(|| EngineError::UnknownAttribute(edge.attribute.clone()))?;
        if !attr_schema.indexed || matches!(edge.target, Target::Uid(_)) {
            return self.add_mutation(edge);
        }

        let edge = self.normalize(edge, Some(attr_schema))?;
        let value_type = attr_schema.value_type;
        let new_tokens: BTreeSet<Token> = match (&edge.op, &edge.target) {
            (Op::Set, Target::Value(value)) => tokenize(value_type, value)?.into_iter().collect(),
            _ => BTreeSet::new(),
        };
        let ts = self.timestamp_for(&edge);

        let attr_lock = self.attribute_lock(&edge.attribute)?;
        let _shared = attr_lock.read().map_err(|_| EngineError::LockPoisoned)?;

        let data_key = data_key(&edge.attribute, edge.entity);
        let data_list = self.cache.get_or_create(&data_key)?;
        let mut data_guard = data_list.lock()?;
        if !data_guard.would_accept(Uid::VALUE, ts) {
            tracing::debug!(
                "Ignoring stale mutation of '{}' for entity {}",
                edge.attribute,
                edge.entity
            );
            return Ok(false);
        }

        let prior_tokens: BTreeSet<Token> = match data_guard.value()? {
            Some(prior) => match tokenize(value_type, &prior) {
                Ok(tokens) => tokens.into_iter().collect(),
                Err(e) => {
                    // Stale index entries for such a value are repaired by a rebuild.
                    tracing::warn!(
                        "Prior value of '{}' for entity {} cannot be tokenized: {e}",
                        edge.attribute,
                        edge.entity
                    );
                    BTreeSet::new()
                }
            },
            None => BTreeSet::new(),
        };

        // Index lists sorted by encoded key: the canonical lock order.
        let mut index_ops: BTreeMap<Vec<u8>, Op> = BTreeMap::new();
        for token in prior_tokens.difference(&new_tokens) {
            index_ops.insert(index_key(&edge.attribute, token), Op::Delete);
        }
        for token in new_tokens.difference(&prior_tokens) {
            index_ops.insert(index_key(&edge.attribute, token), Op::Set);
        }

        let mut index_lists: Vec<(Arc<PostingList>, Op)> = Vec::with_capacity(index_ops.len());
        for (key, op) in index_ops {
            index_lists.push((self.cache.get_or_create(&key)?, op));
        }
        let mut index_guards = Vec::with_capacity(index_lists.len());
        for (list, op) in &index_lists {
            index_guards.push((list.lock()?, *op));
        }

        // Nothing below can fail. The data list decided the order of this
        // mutation under its lock; index lists follow it even where a
        // pending entry carries a newer timestamp.
        for (guard, op) in &mut index_guards {
            guard.record_posting(Posting {
                target: Target::Uid(edge.entity),
                op: *op,
                commit_ts: ts,
                label: None,
            });
        }
        data_guard.add_posting(edge.to_posting(ts));
        drop(index_guards);
        drop(data_guard);

        self.cache.mark_dirty(&data_key)?;
        for (list, _) in &index_lists {
            self.cache.mark_dirty(list.key())?;
        }
        Ok(true)
    }

    /// Flush up to `batch_size` dirty lists on the calling thread.
    ///
    /// # Errors
    ///
    /// The first store error aborts the batch. The failed list and every
    /// list not yet written stay dirty.
    pub fn commit_all(&self, batch_size: usize) -> Result<CommitStats, EngineError> {
        let mut stats = CommitStats::default();
        let mut lists = self.cache.take_dirty(batch_size)?.into_iter();

        while let Some(list) = lists.next() {
            match list.flush(self.store()) {
                Ok(FlushOutcome::Clean) => stats.lists_written += 1,
                Ok(FlushOutcome::StillDirty) => {
                    stats.lists_written += 1;
                    self.cache.mark_dirty(list.key())?;
                }
                Ok(FlushOutcome::Skipped) => stats.lists_skipped += 1,
                Err(e) => {
                    tracing::warn!("Checkpoint aborted: {e}");
                    self.cache.mark_dirty(list.key())?;
                    for rest in lists {
                        self.cache.mark_dirty(rest.key())?;
                    }
                    return Err(e);
                }
            }
        }

        tracing::debug!(
            "Checkpoint wrote {} lists, skipped {}",
            stats.lists_written,
            stats.lists_skipped
        );
        Ok(stats)
    }

    /// Entities whose value of `attribute` shares an index token with
    /// `value`, ascending.
    ///
    /// Tokens bucket some types (strings by case, floats by floor), so the
    /// result is a candidate set for those types.
    pub fn index_lookup(&self, attribute: &str, value: &Value) -> Result<Vec<u64>, EngineError> {
        validate_attribute(attribute).map_err(EngineError::InvalidAttribute)?;
        if !self.schema.is_indexed(attribute) {
            return Err(if self.schema.get(attribute).is_some() {
                EngineError::NotIndexed(attribute.to_string())
            } else {
                EngineError::UnknownAttribute(attribute.to_string())
            });
        }

        let mut uids = BTreeSet::new();
        for token in self.tokenize(attribute, value)? {
            let list = self.cache.get_or_create(&index_key(attribute, &token))?;
            uids.extend(list.uids()?);
        }
        Ok(uids.into_iter().collect())
    }

    /// The resolved value of `attribute` for `entity`.
    pub fn value_of(&self, attribute: &str, entity: u64) -> Result<Option<Value>, EngineError> {
        validate_attribute(attribute).map_err(EngineError::InvalidAttribute)?;
        self.cache
            .get_or_create(&data_key(attribute, Uid(entity)))?
            .value()
    }

    /// The resolved uid targets of `attribute` for `entity`.
    pub fn uids_of(&self, attribute: &str, entity: u64) -> Result<Vec<u64>, EngineError> {
        validate_attribute(attribute).map_err(EngineError::InvalidAttribute)?;
        self.cache
            .get_or_create(&data_key(attribute, Uid(entity)))?
            .uids()
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub(crate) fn attribute_lock(&self, attribute: &str) -> Result<Arc<RwLock<()>>, EngineError> {
        let mut locks = self
            .attribute_locks
            .lock()
            .map_err(|_| EngineError::LockPoisoned)?;
        Ok(Arc::clone(locks.entry(attribute.to_string()).or_default()))
    }

    fn timestamp_for(&self, edge: &DirectedEdge) -> u64 {
        match edge.timestamp {
            Some(ts) => {
                self.clock.observe(ts);
                ts
            }
            None => self.clock.tick(),
        }
    }

    /// Check the edge against the declared type and convert its value.
    #[allow(clippy::unused_self)]
    fn normalize(
        &self,
        edge: &DirectedEdge,
        attr_schema: Option<AttributeSchema>,
    ) -> Result<DirectedEdge, EngineError> {
        let Some(attr_schema) = attr_schema else {
            return Ok(edge.clone());
        };
        match (&edge.target, attr_schema.value_type) {
            (Target::Value(_), ValueType::Uid) => Err(EngineError::InvalidEdge(format!(
                "attribute '{}' holds uids, got a value",
                edge.attribute
            ))),
            (Target::Uid(_), ValueType::Uid) => Ok(edge.clone()),
            (Target::Uid(_), declared) => Err(EngineError::InvalidEdge(format!(
                "attribute '{}' holds {declared} values, got a uid",
                edge.attribute
            ))),
            (Target::Value(value), declared) => {
                let mut converted = edge.clone();
                converted.target = Target::Value(value.convert_to(declared)?);
                Ok(converted)
            }
        }
    }
}
