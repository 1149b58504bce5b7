//! Persistent key-value storage for posting lists.
//!
//! Posting lists live in an ordered byte-keyed store. The key layout is
//! defined in [`keys`]; everything the engine needs from the store is the
//! [`Store`] trait.
//!
//! # Usage
//!
//! ```ignore
//! use posting::storage::{LogStore, Store, data_key};
//!
//! let (store, recovery) = LogStore::open(path, true)?;
//! store.set(&data_key("name", Uid(1)), &bytes)?;
//! for (key, value) in store.scan_prefix(&data_prefix("name"))? { ... }
//! ```

pub mod keys;
mod log_store;
mod memory;
mod store;

pub use keys::{
    DATA_TAG, INDEX_TAG, KeyError, KeyKind, KeyTarget, ParsedKey, data_key, data_prefix,
    index_key, index_prefix,
};
pub use log_store::{LogStore, RecoveryResult};
pub use memory::MemoryStore;
pub use store::{KeyValue, Store, StoreError};
