//! Shared cache of posting lists, keyed by encoded key.
//!
//! # Thread Safety
//!
//! The map sits behind an `RwLock`: lookups of cached lists take the read
//! lock only, and a miss loads from the store and inserts under the write
//! lock with a second lookup, so two callers racing on the same key end up
//! sharing one `PostingList`.
//!
//! # Invariants
//!
//! - Each key maps to at most one live `PostingList`
//! - A key is in the dirty set whenever its list may hold unflushed mutations
//!   that no commit path has picked up yet

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::EngineError;
use crate::list::PostingList;
use crate::storage::Store;

/// Cache of posting lists over a store.
pub struct ListCache {
    store: Arc<dyn Store>,
    lists: RwLock<HashMap<Vec<u8>, Arc<PostingList>>>,
    dirty: Mutex<HashSet<Vec<u8>>>,
}

impl ListCache {
    /// Create an empty cache over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            lists: RwLock::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
        }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// The cached list for `key`, loading it from the store on a miss.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    #[allow(clippy::significant_drop_tightening)] // lock is held across the insert
    pub fn get_or_create(&self, key: &[u8]) -> Result<Arc<PostingList>, EngineError> {
        // Fast path: read lock only
        if let Some(list) = self.get(key)? {
            return Ok(list);
        }

        // Load outside the write lock; a losing racer drops its copy.
        let loaded = Arc::new(PostingList::load(self.store.as_ref(), key)?);

        let mut lists = self.lists.write().map_err(|_| EngineError::LockPoisoned)?;
        if let Some(list) = lists.get(key) {
            return Ok(Arc::clone(list));
        }
        lists.insert(key.to_vec(), Arc::clone(&loaded));
        Ok(loaded)
    }

    /// The cached list for `key`, without touching the store.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn get(&self, key: &[u8]) -> Result<Option<Arc<PostingList>>, EngineError> {
        let lists = self.lists.read().map_err(|_| EngineError::LockPoisoned)?;
        Ok(lists.get(key).map(Arc::clone))
    }

    /// Cached lists whose key starts with `prefix`, sorted by key.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn lists_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Arc<PostingList>>, EngineError> {
        let lists = self.lists.read().map_err(|_| EngineError::LockPoisoned)?;
        let mut matching: Vec<Arc<PostingList>> = lists
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(_, list)| Arc::clone(list))
            .collect();
        drop(lists);
        matching.sort_by(|a, b| a.key().cmp(b.key()));
        Ok(matching)
    }

    /// Number of cached lists.
    pub fn len(&self) -> Result<usize, EngineError> {
        Ok(self
            .lists
            .read()
            .map_err(|_| EngineError::LockPoisoned)?
            .len())
    }

    /// Whether no lists are cached.
    pub fn is_empty(&self) -> Result<bool, EngineError> {
        Ok(self.len()? == 0)
    }

    /// Record that `key` has unflushed mutations.
    pub fn mark_dirty(&self, key: &[u8]) -> Result<(), EngineError> {
        self.dirty
            .lock()
            .map_err(|_| EngineError::LockPoisoned)?
            .insert(key.to_vec());
        Ok(())
    }

    /// Remove and return up to `limit` dirty lists, in key order.
    ///
    /// Keys whose list has been evicted are dropped from the set.
    pub fn take_dirty(&self, limit: usize) -> Result<Vec<Arc<PostingList>>, EngineError> {
        let keys: Vec<Vec<u8>> = {
            let mut dirty = self.dirty.lock().map_err(|_| EngineError::LockPoisoned)?;
            let mut keys: Vec<Vec<u8>> = dirty.iter().cloned().collect();
            keys.sort_unstable();
            keys.truncate(limit);
            for key in &keys {
                dirty.remove(key);
            }
            keys
        };

        let mut lists = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(list) = self.get(&key)? {
                lists.push(list);
            }
        }
        Ok(lists)
    }

    /// Number of keys in the dirty set.
    pub fn dirty_len(&self) -> Result<usize, EngineError> {
        Ok(self.dirty.lock().map_err(|_| EngineError::LockPoisoned)?.len())
    }

    /// Drop lists that are clean, not queued, and referenced only by the
    /// cache. Returns the number evicted.
    pub fn evict_clean(&self) -> Result<usize, EngineError> {
        let mut lists = self.lists.write().map_err(|_| EngineError::LockPoisoned)?;
        let before = lists.len();
        lists.retain(|_, list| {
            Arc::strong_count(list) > 1 || list.is_queued() || !list.is_clean()
        });
        let evicted = before - lists.len();
        drop(lists);
        if evicted > 0 {
            tracing::debug!("Evicted {evicted} clean posting lists");
        }
        Ok(evicted)
    }
}
