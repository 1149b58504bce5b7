//! Index tokens for attribute values.
//!
//! A token is the type tag of the attribute's declared type followed by a
//! type-specific body. Tokens compare byte-lexicographically, and for the
//! ordered types that comparison follows the value order.
//!
//! | Type     | Tag    | Body                                   |
//! |----------|--------|----------------------------------------|
//! | string   | `0x01` | lower-cased UTF-8 bytes (exact match)  |
//! | date     | `0x03` | year, sign-prefixed `i32`              |
//! | datetime | `0x04` | year, sign-prefixed `i32`              |
//! | bool     | `0x05` | `0x00` or `0x01`                       |
//! | int      | `0x06` | value, sign-prefixed `i32`             |
//! | float    | `0x07` | floor of the value, sign-prefixed `i32`|
//!
//! A sign-prefixed `i32` is one byte `0x01` for non-negative numbers and
//! `0x00` for negative ones, followed by the four big-endian bytes of the
//! two's-complement value. Integer-valued tokens are buckets: numbers outside
//! the `i32` range clamp to its bounds and floats bucket by their floor, so
//! equal tokens do not imply equal values.

use std::fmt;

use chrono::Datelike;

use crate::types::{Value, ValueError, ValueType};

/// An encoded index token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(Vec<u8>);

impl Token {
    /// Wrap raw token bytes.
    #[must_use]
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The raw token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the token has no bytes. Tokens produced here never are.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.split_first() {
            Some((tag, body)) => match std::str::from_utf8(body) {
                Ok(s) if *tag == ValueType::String as u8 => write!(f, "{tag:#04x}:{s}"),
                _ => write!(f, "{tag:#04x}:{body:02x?}"),
            },
            None => write!(f, "<empty>"),
        }
    }
}

/// Errors that can occur while tokenizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenizeError {
    /// The declared type has no tokenizer.
    UnsupportedType(ValueType),
    /// The value cannot be converted to the declared type.
    InvalidValue(ValueError),
}

impl fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedType(t) => write!(f, "no tokenizer for type {t}"),
            Self::InvalidValue(e) => write!(f, "value cannot be tokenized: {e}"),
        }
    }
}

impl std::error::Error for TokenizeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidValue(e) => Some(e),
            Self::UnsupportedType(_) => None,
        }
    }
}

impl From<ValueError> for TokenizeError {
    fn from(e: ValueError) -> Self {
        Self::InvalidValue(e)
    }
}

/// The tokenizer chosen by an attribute's declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tokenizer {
    ExactString,
    Date,
    DateTime,
    Bool,
    Int,
    Float,
}

impl Tokenizer {
    /// Select the tokenizer for a declared type.
    pub const fn for_type(value_type: ValueType) -> Result<Self, TokenizeError> {
        match value_type {
            ValueType::String => Ok(Self::ExactString),
            ValueType::Date => Ok(Self::Date),
            ValueType::DateTime => Ok(Self::DateTime),
            ValueType::Bool => Ok(Self::Bool),
            ValueType::Int => Ok(Self::Int),
            ValueType::Float => Ok(Self::Float),
            ValueType::Binary | ValueType::Uid => Err(TokenizeError::UnsupportedType(value_type)),
        }
    }

    /// The declared type this tokenizer handles.
    #[must_use]
    pub const fn value_type(self) -> ValueType {
        match self {
            Self::ExactString => ValueType::String,
            Self::Date => ValueType::Date,
            Self::DateTime => ValueType::DateTime,
            Self::Bool => ValueType::Bool,
            Self::Int => ValueType::Int,
            Self::Float => ValueType::Float,
        }
    }

    /// Tokenize a value, converting it to the declared type first.
    ///
    /// # Post-conditions
    ///
    /// - The result is non-empty, sorted, and free of duplicates.
    /// - Every token starts with `self.value_type() as u8`.
    pub fn tokens(self, value: &Value) -> Result<Vec<Token>, TokenizeError> {
        let value = value.convert_to(self.value_type())?;
        let tag = self.value_type() as u8;

        let body = match (self, &value) {
            (Self::ExactString, Value::String(s)) => s.to_lowercase().into_bytes(),
            (Self::Date, Value::Date(d)) => sortable_i32(d.year()).to_vec(),
            (Self::DateTime, Value::DateTime(dt)) => sortable_i32(dt.year()).to_vec(),
            (Self::Bool, Value::Bool(b)) => vec![u8::from(*b)],
            (Self::Int, Value::Int(n)) => sortable_i32(clamp_i64(*n)).to_vec(),
            (Self::Float, Value::Float(n)) => sortable_i32(clamp_f64(*n)).to_vec(),
            _ => {
                return Err(TokenizeError::InvalidValue(ValueError::Conversion {
                    from: value.value_type(),
                    to: self.value_type(),
                }));
            }
        };

        let mut token = Vec::with_capacity(1 + body.len());
        token.push(tag);
        token.extend_from_slice(&body);
        Ok(vec![Token(token)])
    }
}

/// Tokenize `value` as the declared type `value_type`.
pub fn tokenize(value_type: ValueType, value: &Value) -> Result<Vec<Token>, TokenizeError> {
    Tokenizer::for_type(value_type)?.tokens(value)
}

/// Sign byte followed by the big-endian two's complement.
#[allow(clippy::cast_sign_loss)] // reinterpreting the bits is the encoding
fn sortable_i32(n: i32) -> [u8; 5] {
    let sign = u8::from(n >= 0);
    let [a, b, c, d] = (n as u32).to_be_bytes();
    [sign, a, b, c, d]
}

#[allow(clippy::cast_possible_truncation)] // clamped into range first
fn clamp_i64(n: i64) -> i32 {
    n.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

#[allow(clippy::cast_possible_truncation)] // `as` saturates for out-of-range floats
fn clamp_f64(n: f64) -> i32 {
    n.floor() as i32
}
