//! Attribute schema registry.
//!
//! Maps each attribute to its declared value type and whether it carries a
//! value index. The engine consults it on every mutation, so lookups take a
//! shared lock only.
//!
//! # Text Format
//!
//! One attribute per line, `#` starts a comment:
//!
//! ```text
//! name: string @index
//! age: int @index
//! friend: uid
//! ```
//!
//! # Invariants
//!
//! - Every registered attribute name is non-empty
//! - An indexed attribute always has a type with a tokenizer

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use crate::tokenizer::Tokenizer;
use crate::types::{ValueType, validate_attribute};

/// Declared shape of one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSchema {
    pub value_type: ValueType,
    pub indexed: bool,
}

/// Errors that can occur while building a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A line could not be parsed.
    Syntax { line: usize, message: String },
    /// The type name is unknown.
    UnknownType { line: usize, name: String },
    /// The attribute name cannot be encoded in a key.
    InvalidAttribute(String),
    /// `@index` on a type without a tokenizer.
    NotIndexable {
        attribute: String,
        value_type: ValueType,
    },
    /// The registry lock was poisoned.
    LockPoisoned,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax { line, message } => write!(f, "schema line {line}: {message}"),
            Self::UnknownType { line, name } => {
                write!(f, "schema line {line}: unknown type '{name}'")
            }
            Self::InvalidAttribute(msg) => write!(f, "invalid attribute: {msg}"),
            Self::NotIndexable {
                attribute,
                value_type,
            } => write!(f, "attribute '{attribute}' of type {value_type} cannot be indexed"),
            Self::LockPoisoned => write!(f, "schema lock poisoned"),
        }
    }
}

impl std::error::Error for SchemaError {}

/// Thread-safe attribute registry.
#[derive(Debug, Default)]
pub struct Schema {
    attributes: RwLock<HashMap<String, AttributeSchema>>,
}

impl Schema {
    /// Create an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the text format.
    ///
    /// A later line for the same attribute replaces the earlier one.
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        let schema = Self::new();
        for (i, raw) in text.lines().enumerate() {
            let line = i + 1;
            let content = raw.split('#').next().unwrap_or_default().trim();
            if content.is_empty() {
                continue;
            }

            let (attribute, rest) = content.split_once(':').ok_or_else(|| SchemaError::Syntax {
                line,
                message: format!("expected 'attribute: type', got '{content}'"),
            })?;
            let attribute = attribute.trim();
            if attribute.is_empty() {
                return Err(SchemaError::Syntax {
                    line,
                    message: "attribute name was empty".to_string(),
                });
            }

            let mut words = rest.split_whitespace();
            let type_name = words.next().ok_or_else(|| SchemaError::Syntax {
                line,
                message: format!("missing type for '{attribute}'"),
            })?;
            let value_type =
                ValueType::from_name(type_name).ok_or_else(|| SchemaError::UnknownType {
                    line,
                    name: type_name.to_string(),
                })?;

            let mut indexed = false;
            for directive in words {
                match directive {
                    "@index" => indexed = true,
                    other => {
                        return Err(SchemaError::Syntax {
                            line,
                            message: format!("unknown directive '{other}'"),
                        });
                    }
                }
            }

            schema.set(attribute, value_type, indexed)?;
        }
        Ok(schema)
    }

    /// Register or replace an attribute.
    pub fn set(&self, attribute: &str, value_type: ValueType, indexed: bool) -> Result<(), SchemaError> {
        validate_attribute(attribute).map_err(SchemaError::InvalidAttribute)?;
        if indexed && Tokenizer::for_type(value_type).is_err() {
            return Err(SchemaError::NotIndexable {
                attribute: attribute.to_string(),
                value_type,
            });
        }
        self.attributes
            .write()
            .map_err(|_| SchemaError::LockPoisoned)?
            .insert(
                attribute.to_string(),
                AttributeSchema {
                    value_type,
                    indexed,
                },
            );
        Ok(())
    }

    /// Declared shape of `attribute`.
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<AttributeSchema> {
        self.attributes.read().ok()?.get(attribute).copied()
    }

    /// Declared type of `attribute`.
    #[must_use]
    pub fn type_of(&self, attribute: &str) -> Option<ValueType> {
        self.get(attribute).map(|a| a.value_type)
    }

    /// Whether `attribute` carries a value index.
    #[must_use]
    pub fn is_indexed(&self, attribute: &str) -> bool {
        self.get(attribute).is_some_and(|a| a.indexed)
    }

    /// Registered attribute names, sorted.
    #[must_use]
    pub fn attributes(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .attributes
            .read()
            .map(|attrs| attrs.keys().cloned().collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }
}
