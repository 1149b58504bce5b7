//! Persistent key-value store abstraction.
//!
//! The engine only needs point reads, point writes, deletes, and ordered
//! prefix scans. Implementations must be safe to share across threads: the
//! commit workers, the rebuilder, and mutation callers all use one handle.

/// A key and its value.
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// Errors that can occur during store operations.
#[derive(Debug)]
pub enum StoreError {
    /// I/O error.
    Io(std::io::Error),
    /// Stored bytes failed an integrity check.
    Corruption(String),
    /// Injected fault for testing.
    InjectedFault(String),
    /// A lock guarding the store was poisoned.
    LockPoisoned,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
            Self::LockPoisoned => write!(f, "store lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Abstraction over the persistent key-value store.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `get` returns the last value written by `set` for a key
/// - `delete` of a missing key succeeds
/// - `scan_prefix` returns entries in ascending byte order of the key,
///   reflecting every write that completed before the call
pub trait Store: Send + Sync {
    /// Read a value.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Remove a key.
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KeyValue>, StoreError>;
}
