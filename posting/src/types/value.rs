//! Typed scalar values and their storage encoding.
//!
//! Provides the `Value` enum and the `ValueType` discriminant shared by the
//! schema, the storage encoding of value postings, and the index tokens.
//!
//! # Storage Format
//!
//! ```text
//! +------+-----------------------------------------------+
//! | 0    | value type tag (1 byte)                       |
//! | 1-N  | payload (depends on type, runs to the end)    |
//! +------+-----------------------------------------------+
//! ```
//!
//! The value always lives in its own protobuf `bytes` field, so variable
//! length payloads need no length prefix.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime};

/// Value type discriminants.
///
/// The numeric tags are stable: they are written to disk inside value
/// postings and form the first byte of every index token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    String = 0x01,
    Binary = 0x02,
    Date = 0x03,
    DateTime = 0x04,
    Bool = 0x05,
    Int = 0x06,
    Float = 0x07,
    /// Reference to another entity. Never carried by a `Value`.
    Uid = 0x08,
}

impl ValueType {
    /// Parse a schema type name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "binary" | "default" => Some(Self::Binary),
            "date" => Some(Self::Date),
            "datetime" => Some(Self::DateTime),
            "bool" => Some(Self::Bool),
            "int" => Some(Self::Int),
            "float" => Some(Self::Float),
            "uid" => Some(Self::Uid),
            _ => None,
        }
    }

    /// Schema type name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Binary => "binary",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Uid => "uid",
        }
    }
}

impl TryFrom<u8> for ValueType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::String),
            0x02 => Ok(Self::Binary),
            0x03 => Ok(Self::Date),
            0x04 => Ok(Self::DateTime),
            0x05 => Ok(Self::Bool),
            0x06 => Ok(Self::Int),
            0x07 => Ok(Self::Float),
            0x08 => Ok(Self::Uid),
            _ => Err(value),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A scalar attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Binary(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Bool(bool),
    Int(i64),
    Float(f64),
}

/// Errors that can occur with value operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// The stored bytes do not form a value.
    InvalidEncoding,
    /// The value cannot be represented as the requested type.
    Conversion { from: ValueType, to: ValueType },
    /// A string could not be parsed as the requested type.
    Parse { to: ValueType, input: String },
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEncoding => write!(f, "invalid value encoding"),
            Self::Conversion { from, to } => write!(f, "cannot convert {from} to {to}"),
            Self::Parse { to, input } => write!(f, "cannot parse {input:?} as {to}"),
        }
    }
}

impl std::error::Error for ValueError {}

impl Value {
    /// Get the value type discriminant.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::String(_) => ValueType::String,
            Self::Binary(_) => ValueType::Binary,
            Self::Date(_) => ValueType::Date,
            Self::DateTime(_) => ValueType::DateTime,
            Self::Bool(_) => ValueType::Bool,
            Self::Int(_) => ValueType::Int,
            Self::Float(_) => ValueType::Float,
        }
    }

    /// Serialize this value to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.value_type() as u8];
        match self {
            Self::String(s) => bytes.extend_from_slice(s.as_bytes()),
            Self::Binary(b) => bytes.extend_from_slice(b),
            Self::Date(d) => bytes.extend_from_slice(&d.num_days_from_ce().to_le_bytes()),
            Self::DateTime(dt) => {
                let utc = dt.and_utc();
                bytes.extend_from_slice(&utc.timestamp().to_le_bytes());
                bytes.extend_from_slice(&utc.timestamp_subsec_nanos().to_le_bytes());
            }
            Self::Bool(b) => bytes.push(u8::from(*b)),
            Self::Int(n) => bytes.extend_from_slice(&n.to_le_bytes()),
            Self::Float(n) => bytes.extend_from_slice(&n.to_le_bytes()),
        }
        bytes
    }

    /// Deserialize a value from bytes produced by `to_bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ValueError> {
        let (&tag, payload) = bytes.split_first().ok_or(ValueError::InvalidEncoding)?;
        let value_type = ValueType::try_from(tag).map_err(|_| ValueError::InvalidEncoding)?;

        match value_type {
            ValueType::String => String::from_utf8(payload.to_vec())
                .map(Self::String)
                .map_err(|_| ValueError::InvalidEncoding),
            ValueType::Binary => Ok(Self::Binary(payload.to_vec())),
            ValueType::Date => {
                let days = i32::from_le_bytes(fixed(payload)?);
                NaiveDate::from_num_days_from_ce_opt(days)
                    .map(Self::Date)
                    .ok_or(ValueError::InvalidEncoding)
            }
            ValueType::DateTime => {
                if payload.len() != 12 {
                    return Err(ValueError::InvalidEncoding);
                }
                let secs = i64::from_le_bytes(fixed(&payload[..8])?);
                let nanos = u32::from_le_bytes(fixed(&payload[8..])?);
                DateTime::from_timestamp(secs, nanos)
                    .map(|dt| Self::DateTime(dt.naive_utc()))
                    .ok_or(ValueError::InvalidEncoding)
            }
            ValueType::Bool => match payload {
                [0] => Ok(Self::Bool(false)),
                [1] => Ok(Self::Bool(true)),
                _ => Err(ValueError::InvalidEncoding),
            },
            ValueType::Int => Ok(Self::Int(i64::from_le_bytes(fixed(payload)?))),
            ValueType::Float => Ok(Self::Float(f64::from_le_bytes(fixed(payload)?))),
            ValueType::Uid => Err(ValueError::InvalidEncoding),
        }
    }

    /// Convert this value to the given type.
    ///
    /// Strings are parsed, numbers widen or truncate, dates and datetimes
    /// convert into each other. Non-finite floats are rejected because they
    /// have no place in an ordered index.
    #[allow(clippy::cast_precision_loss)] // i64 -> f64 is the documented int-to-float conversion
    #[allow(clippy::cast_possible_truncation)] // float -> int truncates by design of the conversion
    pub fn convert_to(&self, to: ValueType) -> Result<Self, ValueError> {
        let from = self.value_type();
        let converted = match (self, to) {
            (_, t) if t == from => self.clone(),
            (Self::String(s), t) => parse_string(s, t)?,
            (Self::Binary(b), ValueType::String) => Self::String(
                String::from_utf8(b.clone()).map_err(|_| ValueError::Conversion { from, to })?,
            ),
            (Self::Int(n), ValueType::Float) => Self::Float(*n as f64),
            (Self::Int(n), ValueType::Bool) => Self::Bool(*n != 0),
            (Self::Float(n), ValueType::Int) if n.is_finite() => Self::Int(n.trunc() as i64),
            (Self::Date(d), ValueType::DateTime) => Self::DateTime(d.and_time(NaiveTime::MIN)),
            (Self::DateTime(dt), ValueType::Date) => Self::Date(dt.date()),
            (v, ValueType::String) => Self::String(v.to_string()),
            _ => return Err(ValueError::Conversion { from, to }),
        };

        if let Self::Float(n) = converted {
            if !n.is_finite() {
                return Err(ValueError::Conversion { from, to });
            }
        }
        Ok(converted)
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], ValueError> {
    bytes.try_into().map_err(|_| ValueError::InvalidEncoding)
}

fn parse_string(s: &str, to: ValueType) -> Result<Value, ValueError> {
    let parse_error = || ValueError::Parse {
        to,
        input: s.to_owned(),
    };
    let trimmed = s.trim();

    match to {
        ValueType::String => Ok(Value::String(s.to_owned())),
        ValueType::Binary => Ok(Value::Binary(s.as_bytes().to_vec())),
        ValueType::Int => trimmed.parse().map(Value::Int).map_err(|_| parse_error()),
        ValueType::Float => trimmed.parse().map(Value::Float).map_err(|_| parse_error()),
        ValueType::Bool => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(parse_error()),
        },
        ValueType::Date => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|_| parse_error()),
        ValueType::DateTime => parse_datetime(trimmed)
            .map(Value::DateTime)
            .ok_or_else(parse_error),
        ValueType::Uid => Err(ValueError::Conversion {
            from: ValueType::String,
            to,
        }),
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Binary(b) => write!(f, "{b:02x?}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(n) => write!(f, "{n}"),
        }
    }
}
