//! Engine-level errors.

use crate::storage::{KeyError, StoreError};
use crate::tokenizer::TokenizeError;
use crate::types::{ValueError, ValueType};

/// Errors returned by engine operations.
#[derive(Debug)]
pub enum EngineError {
    /// The attribute's declared type has no tokenizer.
    UnsupportedType(ValueType),
    /// The value cannot be converted to the attribute's declared type.
    InvalidValue(ValueError),
    /// The mutation request is malformed.
    InvalidEdge(String),
    /// The attribute name cannot be encoded in a key.
    InvalidAttribute(String),
    /// A stored key could not be decoded.
    MalformedKey(KeyError),
    /// The store failed.
    Io(StoreError),
    /// A list's committed layer holds more than one posting for a target.
    ConflictingState(String),
    /// The attribute is not in the schema.
    UnknownAttribute(String),
    /// The attribute has no value index.
    NotIndexed(String),
    /// The operation was cancelled before it wrote anything.
    Cancelled,
    /// The commit pipeline has no workers left.
    PipelineClosed,
    /// A lock was poisoned by a panicking holder.
    LockPoisoned,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedType(t) => write!(f, "no tokenizer for type {t}"),
            Self::InvalidValue(e) => write!(f, "invalid value: {e}"),
            Self::InvalidEdge(msg) => write!(f, "invalid edge: {msg}"),
            Self::InvalidAttribute(msg) => write!(f, "invalid attribute: {msg}"),
            Self::MalformedKey(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "store error: {e}"),
            Self::ConflictingState(msg) => write!(f, "conflicting list state: {msg}"),
            Self::UnknownAttribute(attr) => write!(f, "attribute '{attr}' is not in the schema"),
            Self::NotIndexed(attr) => write!(f, "attribute '{attr}' is not indexed"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::PipelineClosed => write!(f, "commit pipeline closed"),
            Self::LockPoisoned => write!(f, "lock poisoned"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidValue(e) => Some(e),
            Self::MalformedKey(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        Self::Io(e)
    }
}

impl From<KeyError> for EngineError {
    fn from(e: KeyError) -> Self {
        Self::MalformedKey(e)
    }
}

impl From<ValueError> for EngineError {
    fn from(e: ValueError) -> Self {
        Self::InvalidValue(e)
    }
}

impl From<TokenizeError> for EngineError {
    fn from(e: TokenizeError) -> Self {
        match e {
            TokenizeError::UnsupportedType(t) => Self::UnsupportedType(t),
            TokenizeError::InvalidValue(e) => Self::InvalidValue(e),
        }
    }
}
