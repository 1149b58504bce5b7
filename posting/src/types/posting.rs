//! Postings and their persisted protobuf form.
//!
//! `Posting` is the in-memory fact; `PostingProto`/`PostingListProto` are the
//! stable serialized format written to the store under a list's key.

use prost::Message;

use crate::types::{Uid, Value, ValueError};

/// Operation carried by a posting or an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Op {
    Set = 0,
    Delete = 1,
}

impl TryFrom<u32> for Op {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Set),
            1 => Ok(Self::Delete),
            _ => Err(value),
        }
    }
}

/// What a posting points at.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Edge to another entity.
    Uid(Uid),
    /// Scalar value held by the list's entity.
    Value(Value),
}

/// One fact inside a posting list.
///
/// The subject is implicit: it is the key of the list that holds the posting.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub target: Target,
    pub op: Op,
    pub commit_ts: u64,
    pub label: Option<String>,
}

impl Posting {
    /// Target identity used for ordering and deduplication.
    ///
    /// Scalar values share `Uid::VALUE`, so a list holds at most one value.
    #[must_use]
    pub const fn uid(&self) -> Uid {
        match self.target {
            Target::Uid(uid) => uid,
            Target::Value(_) => Uid::VALUE,
        }
    }

    /// The scalar value, if this is a value posting.
    #[must_use]
    pub const fn value(&self) -> Option<&Value> {
        match &self.target {
            Target::Value(value) => Some(value),
            Target::Uid(_) => None,
        }
    }

    /// Convert to the persisted form.
    #[must_use]
    pub fn to_proto(&self) -> PostingProto {
        let (value, value_type) = match &self.target {
            Target::Uid(_) => (Vec::new(), 0),
            Target::Value(v) => (v.to_bytes(), u32::from(v.value_type() as u8)),
        };
        PostingProto {
            uid: self.uid().0,
            value,
            value_type,
            op: self.op as u32,
            commit_ts: self.commit_ts,
            label: self.label.clone().unwrap_or_default(),
        }
    }

    /// Convert from the persisted form.
    pub fn from_proto(proto: &PostingProto) -> Result<Self, ValueError> {
        let target = if proto.value.is_empty() {
            Target::Uid(Uid(proto.uid))
        } else {
            Target::Value(Value::from_bytes(&proto.value)?)
        };
        let op = Op::try_from(proto.op).map_err(|_| ValueError::InvalidEncoding)?;
        Ok(Self {
            target,
            op,
            commit_ts: proto.commit_ts,
            label: (!proto.label.is_empty()).then(|| proto.label.clone()),
        })
    }
}

/// Persisted posting.
#[derive(Clone, PartialEq, Message)]
pub struct PostingProto {
    #[prost(uint64, tag = "1")]
    pub uid: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
    #[prost(uint32, tag = "3")]
    pub value_type: u32,
    #[prost(uint32, tag = "4")]
    pub op: u32,
    #[prost(uint64, tag = "5")]
    pub commit_ts: u64,
    #[prost(string, tag = "6")]
    pub label: String,
}

/// Persisted posting list: the resolved postings of one key, sorted by uid.
#[derive(Clone, PartialEq, Message)]
pub struct PostingListProto {
    #[prost(message, repeated, tag = "1")]
    pub postings: Vec<PostingProto>,
}

/// Serialize resolved postings for the store.
#[must_use]
pub fn encode_postings(postings: &[Posting]) -> Vec<u8> {
    PostingListProto {
        postings: postings.iter().map(Posting::to_proto).collect(),
    }
    .encode_to_vec()
}

/// Deserialize postings written by `encode_postings`.
pub fn decode_postings(bytes: &[u8]) -> Result<Vec<Posting>, ValueError> {
    let list = PostingListProto::decode(bytes).map_err(|_| ValueError::InvalidEncoding)?;
    list.postings.iter().map(Posting::from_proto).collect()
}
