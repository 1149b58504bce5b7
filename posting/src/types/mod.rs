//! Core data types shared across the engine.

mod edge;
mod ids;
mod posting;
mod value;

pub use edge::{DirectedEdge, MAX_ATTRIBUTE_LENGTH, validate_attribute};
pub use ids::Uid;
pub use posting::{
    Op, Posting, PostingListProto, PostingProto, Target, decode_postings, encode_postings,
};
pub use value::{Value, ValueError, ValueType};
