//! Entity identifiers.
//!
//! Entities are addressed by a 64-bit uid. Two values are reserved:
//! `0` is never a valid entity, and `u64::MAX` is the target identity used by
//! scalar value postings inside a data list.

use std::fmt;

/// A unique identifier for an entity.
///
/// # Invariants
///
/// - A uid referring to an entity is never `0` and never `u64::MAX`.
/// - Uids order numerically, which is also the order of their big-endian
///   encoding inside keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Uid(pub u64);

impl Uid {
    /// Target identity of a scalar value posting.
    pub const VALUE: Self = Self(u64::MAX);

    /// Whether this uid may name an entity.
    #[must_use]
    pub const fn is_entity(self) -> bool {
        self.0 != 0 && self.0 != u64::MAX
    }

    /// Big-endian encoding, as used inside data keys.
    #[must_use]
    pub const fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Decode a big-endian uid.
    #[must_use]
    pub const fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for Uid {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

impl From<Uid> for u64 {
    fn from(uid: Uid) -> Self {
        uid.0
    }
}
