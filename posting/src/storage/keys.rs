//! Key encoding for data and index posting lists.
//!
//! # Key Format
//!
//! ```text
//! +------+------------------------------------------+
//! | 0    | kind tag (1 byte)                        |
//! | 1-2  | attribute length (u16, big-endian)       |
//! | 3-N  | attribute (UTF-8)                        |
//! | N-   | body                                     |
//! +------+------------------------------------------+
//! ```
//!
//! - Data keys (`0x00`): body is the entity uid, 8 bytes big-endian.
//! - Index keys (`0x02`): body is the token, at least one byte.
//!
//! The length prefix keeps attribute names prefix-free, so `index_prefix("name")`
//! never matches keys of `"names"`. Data keys of every attribute sort before
//! all index keys; the engine relies on this for its lock order.

use std::fmt;

use crate::tokenizer::Token;
use crate::types::Uid;

/// Kind tag of a data key.
pub const DATA_TAG: u8 = 0x00;
/// Kind tag of an index key.
pub const INDEX_TAG: u8 = 0x02;

const HEADER_SIZE: usize = 3;
const UID_SIZE: usize = 8;

/// Classification of a raw key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Data,
    Index,
    /// A key with an unknown tag, kept for callers that skip foreign keys.
    Other(u8),
}

/// What a key addresses within its attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyTarget {
    Entity(Uid),
    Token(Token),
    Other { tag: u8, body: Vec<u8> },
}

/// A decoded key.
///
/// # Invariants
///
/// - `ParsedKey::parse(&k.encode()) == Ok(k)` for every parsed key
/// - `encode(parse(bytes)) == bytes` for every accepted input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub attribute: String,
    pub target: KeyTarget,
}

/// Errors that can occur while decoding a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The key is shorter than its header or declared attribute.
    Truncated { len: usize },
    /// The attribute is not valid UTF-8.
    InvalidAttribute,
    /// The body does not match what the kind tag requires.
    InvalidBody { kind: KeyKind, len: usize },
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len } => write!(f, "malformed key: truncated at {len} bytes"),
            Self::InvalidAttribute => write!(f, "malformed key: attribute is not UTF-8"),
            Self::InvalidBody { kind, len } => {
                write!(f, "malformed key: {len} byte body is invalid for {kind:?} key")
            }
        }
    }
}

impl std::error::Error for KeyError {}

impl ParsedKey {
    /// Data key of `(attribute, uid)`.
    #[must_use]
    pub fn data(attribute: &str, uid: Uid) -> Self {
        Self {
            attribute: attribute.to_owned(),
            target: KeyTarget::Entity(uid),
        }
    }

    /// Index key of `(attribute, token)`.
    #[must_use]
    pub fn index(attribute: &str, token: Token) -> Self {
        Self {
            attribute: attribute.to_owned(),
            target: KeyTarget::Token(token),
        }
    }

    /// Kind of this key.
    #[must_use]
    pub const fn kind(&self) -> KeyKind {
        match &self.target {
            KeyTarget::Entity(_) => KeyKind::Data,
            KeyTarget::Token(_) => KeyKind::Index,
            KeyTarget::Other { tag, .. } => KeyKind::Other(*tag),
        }
    }

    /// Whether this is a data key.
    #[must_use]
    pub const fn is_data(&self) -> bool {
        matches!(self.target, KeyTarget::Entity(_))
    }

    /// Whether this is an index key.
    #[must_use]
    pub const fn is_index(&self) -> bool {
        matches!(self.target, KeyTarget::Token(_))
    }

    /// The entity of a data key.
    #[must_use]
    pub const fn uid(&self) -> Option<Uid> {
        match self.target {
            KeyTarget::Entity(uid) => Some(uid),
            _ => None,
        }
    }

    /// The token of an index key.
    #[must_use]
    pub const fn token(&self) -> Option<&Token> {
        match &self.target {
            KeyTarget::Token(token) => Some(token),
            _ => None,
        }
    }

    /// Encode this key.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match &self.target {
            KeyTarget::Entity(uid) => {
                let mut key = header(DATA_TAG, &self.attribute, UID_SIZE);
                key.extend_from_slice(&uid.to_be_bytes());
                key
            }
            KeyTarget::Token(token) => {
                let mut key = header(INDEX_TAG, &self.attribute, token.len());
                key.extend_from_slice(token.as_bytes());
                key
            }
            KeyTarget::Other { tag, body } => {
                let mut key = header(*tag, &self.attribute, body.len());
                key.extend_from_slice(body);
                key
            }
        }
    }

    /// Decode a raw key.
    pub fn parse(key: &[u8]) -> Result<Self, KeyError> {
        if key.len() < HEADER_SIZE {
            return Err(KeyError::Truncated { len: key.len() });
        }
        let tag = key[0];
        let attr_len = usize::from(u16::from_be_bytes([key[1], key[2]]));
        let body_start = HEADER_SIZE + attr_len;
        if key.len() < body_start {
            return Err(KeyError::Truncated { len: key.len() });
        }
        let attribute = std::str::from_utf8(&key[HEADER_SIZE..body_start])
            .map_err(|_| KeyError::InvalidAttribute)?
            .to_owned();
        let body = &key[body_start..];

        let target = match tag {
            DATA_TAG => {
                let bytes: [u8; UID_SIZE] =
                    body.try_into().map_err(|_| KeyError::InvalidBody {
                        kind: KeyKind::Data,
                        len: body.len(),
                    })?;
                KeyTarget::Entity(Uid::from_be_bytes(bytes))
            }
            INDEX_TAG => {
                if body.is_empty() {
                    return Err(KeyError::InvalidBody {
                        kind: KeyKind::Index,
                        len: 0,
                    });
                }
                KeyTarget::Token(Token::from_bytes(body.to_vec()))
            }
            other => KeyTarget::Other {
                tag: other,
                body: body.to_vec(),
            },
        };

        Ok(Self { attribute, target })
    }
}

/// Encoded data key of `(attribute, uid)`.
#[must_use]
pub fn data_key(attribute: &str, uid: Uid) -> Vec<u8> {
    let mut key = header(DATA_TAG, attribute, UID_SIZE);
    key.extend_from_slice(&uid.to_be_bytes());
    key
}

/// Encoded index key of `(attribute, token)`.
#[must_use]
pub fn index_key(attribute: &str, token: &Token) -> Vec<u8> {
    let mut key = header(INDEX_TAG, attribute, token.len());
    key.extend_from_slice(token.as_bytes());
    key
}

/// Prefix shared by every data key of `attribute`.
#[must_use]
pub fn data_prefix(attribute: &str) -> Vec<u8> {
    header(DATA_TAG, attribute, 0)
}

/// Prefix shared by every index key of `attribute`.
#[must_use]
pub fn index_prefix(attribute: &str) -> Vec<u8> {
    header(INDEX_TAG, attribute, 0)
}

#[allow(clippy::cast_possible_truncation)] // entry points reject attributes failing `validate_attribute`
fn header(tag: u8, attribute: &str, body_len: usize) -> Vec<u8> {
    debug_assert!(attribute.len() <= usize::from(u16::MAX));
    let mut key = Vec::with_capacity(HEADER_SIZE + attribute.len() + body_len);
    key.push(tag);
    key.extend_from_slice(&(attribute.len() as u16).to_be_bytes());
    key.extend_from_slice(attribute.as_bytes());
    key
}
