//! Test helpers: engines over in-memory stores, a fault-injecting store, a
//! store whose writes can be held at a gate, and a store that runs a
//! callback in the middle of an operation.

// Test helpers legitimately clone shared handles
#![allow(clippy::disallowed_methods)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::schema::Schema;
use crate::storage::{KeyValue, MemoryStore, Store, StoreError};

/// Engine configuration with a short commit interval for pipeline tests.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        commit_workers: 2,
        commit_queue_capacity: 4,
        commit_interval: Duration::from_millis(10),
        commit_batch_size: 100,
        cache_soft_limit: 1000,
    }
}

/// Create an engine over a fresh `MemoryStore` with the given schema text.
pub fn new_test_engine(schema: &str) -> Arc<Engine> {
    new_test_engine_with_store(schema, Arc::new(MemoryStore::new()))
}

/// Create an engine over `store` with the given schema text.
pub fn new_test_engine_with_store(schema: &str, store: Arc<dyn Store>) -> Arc<Engine> {
    let schema = Schema::parse(schema).expect("test schema must parse");
    Engine::new(store, Arc::new(schema), test_config())
}

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a write or delete error (0.0 - 1.0).
    pub write_error_rate: f64,
}

impl FaultConfig {
    /// No faults (for baseline testing).
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// High write fault rate (for retry testing).
    #[must_use]
    pub const fn high_write_faults() -> Self {
        Self {
            read_error_rate: 0.0,
            write_error_rate: 0.3,
        }
    }
}

/// A `MemoryStore` that fails operations at configured rates.
///
/// Faults are drawn from a seeded RNG so a failing run can be replayed.
/// `fail_writes` forces every write to fail regardless of the rates.
pub struct FaultyStore {
    inner: MemoryStore,
    config: FaultConfig,
    rng: Mutex<StdRng>,
    fail_writes: AtomicBool,
    injected_faults: AtomicU64,
}

impl FaultyStore {
    pub fn new(seed: u64, config: FaultConfig) -> Self {
        Self {
            inner: MemoryStore::new(),
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            fail_writes: AtomicBool::new(false),
            injected_faults: AtomicU64::new(0),
        }
    }

    /// Force every subsequent write to fail, or stop doing so.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of faults injected so far.
    pub fn injected_faults(&self) -> u64 {
        self.injected_faults.load(Ordering::SeqCst)
    }

    /// The underlying store, bypassing fault injection.
    pub const fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn maybe_fail(&self, rate: f64, forced: bool, op: &str) -> Result<(), StoreError> {
        let hit = forced || {
            let mut rng = self.rng.lock().map_err(|_| StoreError::LockPoisoned)?;
            rate > 0.0 && rng.random_bool(rate)
        };
        if hit {
            self.injected_faults.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::InjectedFault(op.to_string()));
        }
        Ok(())
    }
}

impl Store for FaultyStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.maybe_fail(self.config.read_error_rate, false, "get")?;
        self.inner.get(key)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let forced = self.fail_writes.load(Ordering::SeqCst);
        self.maybe_fail(self.config.write_error_rate, forced, "set")?;
        self.inner.set(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        let forced = self.fail_writes.load(Ordering::SeqCst);
        self.maybe_fail(self.config.write_error_rate, forced, "delete")?;
        self.inner.delete(key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KeyValue>, StoreError> {
        self.maybe_fail(self.config.read_error_rate, false, "scan_prefix")?;
        self.inner.scan_prefix(prefix)
    }
}

/// A `MemoryStore` whose writes block while its gate is closed.
///
/// Lets a test hold a flush in the middle of its store call.
pub struct GatedStore {
    inner: MemoryStore,
    open: Mutex<bool>,
    opened: Condvar,
    writes: AtomicU64,
    waiting: AtomicU64,
}

impl GatedStore {
    /// A store with the gate open.
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            open: Mutex::new(true),
            opened: Condvar::new(),
            writes: AtomicU64::new(0),
            waiting: AtomicU64::new(0),
        }
    }

    /// Hold every subsequent write until `open` is called.
    pub fn close(&self) {
        if let Ok(mut open) = self.open.lock() {
            *open = false;
        }
    }

    /// Release held writes.
    pub fn open(&self) {
        if let Ok(mut open) = self.open.lock() {
            *open = true;
        }
        self.opened.notify_all();
    }

    /// Writes that reached the inner store.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Writers currently held at the gate.
    pub fn waiting(&self) -> u64 {
        self.waiting.load(Ordering::SeqCst)
    }

    fn pass(&self) -> Result<(), StoreError> {
        let mut open = self.open.lock().map_err(|_| StoreError::LockPoisoned)?;
        self.waiting.fetch_add(1, Ordering::SeqCst);
        while !*open {
            open = self
                .opened
                .wait(open)
                .map_err(|_| StoreError::LockPoisoned)?;
        }
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Store for GatedStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.pass()?;
        self.inner.set(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.pass()?;
        self.inner.delete(key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KeyValue>, StoreError> {
        self.inner.scan_prefix(prefix)
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// A `MemoryStore` that runs a one-shot callback before a chosen call.
///
/// Lets a test act in the middle of an operation, between two of its store
/// calls. Callbacks that touch the store go through `inner()`.
pub struct HookStore {
    inner: Arc<MemoryStore>,
    before_set: Mutex<Option<Hook>>,
    before_scan: Mutex<Option<Hook>>,
}

impl HookStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryStore::new()),
            before_set: Mutex::new(None),
            before_scan: Mutex::new(None),
        }
    }

    /// Run `hook` before the next `set`.
    pub fn on_next_set(&self, hook: impl FnOnce() + Send + 'static) {
        if let Ok(mut slot) = self.before_set.lock() {
            *slot = Some(Box::new(hook));
        }
    }

    /// Run `hook` before the next `scan_prefix`.
    pub fn on_next_scan(&self, hook: impl FnOnce() + Send + 'static) {
        if let Ok(mut slot) = self.before_scan.lock() {
            *slot = Some(Box::new(hook));
        }
    }

    /// The underlying store, bypassing hooks.
    pub fn inner(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.inner)
    }

    fn fire(slot: &Mutex<Option<Hook>>) -> Result<(), StoreError> {
        // Taken out first so the hook runs without the slot locked.
        let hook = slot.lock().map_err(|_| StoreError::LockPoisoned)?.take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(())
    }
}

impl Store for HookStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        Self::fire(&self.before_set)?;
        self.inner.set(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.inner.delete(key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KeyValue>, StoreError> {
        Self::fire(&self.before_scan)?;
        self.inner.scan_prefix(prefix)
    }
}

/// Poll `condition` every millisecond until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    condition()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_faults_passes_through() {
        let store = FaultyStore::new(1, FaultConfig::no_faults());
        store.set(b"a", b"1").unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.injected_faults(), 0);
    }

    #[test]
    fn test_forced_write_failure() {
        let store = FaultyStore::new(1, FaultConfig::no_faults());
        store.set_fail_writes(true);
        assert!(matches!(
            store.set(b"a", b"1"),
            Err(StoreError::InjectedFault(_))
        ));
        assert!(store.delete(b"a").is_err());
        assert_eq!(store.get(b"a").unwrap(), None);
        store.set_fail_writes(false);
        store.set(b"a", b"1").unwrap();
        assert_eq!(store.injected_faults(), 2);
    }

    #[test]
    fn test_same_seed_same_faults() {
        let run = |seed| {
            let store = FaultyStore::new(seed, FaultConfig::high_write_faults());
            (0..200u32)
                .map(|i| store.set(&i.to_be_bytes(), b"v").is_ok())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(42), run(42));
        assert!(run(42).iter().any(|ok| !ok));
    }

    #[test]
    fn test_hook_fires_once_before_call() {
        let store = HookStore::new();
        let inner = store.inner();
        store.on_next_set(move || inner.set(b"first", b"hook").unwrap());
        store.set(b"a", b"1").unwrap();
        assert_eq!(store.get(b"first").unwrap(), Some(b"hook".to_vec()));

        store.delete(b"first").unwrap();
        store.set(b"b", b"2").unwrap();
        assert_eq!(store.get(b"first").unwrap(), None);
    }

    #[test]
    fn test_gate_holds_writes_until_opened() {
        let store = Arc::new(GatedStore::new());
        store.close();

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.set(b"a", b"1"))
        };
        while store.waiting() == 0 {
            std::thread::yield_now();
        }
        assert_eq!(store.get(b"a").unwrap(), None);
        assert_eq!(store.writes(), 0);

        store.open();
        writer.join().unwrap().unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.writes(), 1);
    }
}
