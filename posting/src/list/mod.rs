//! In-memory posting lists and the cache that shares them.

mod cache;
mod posting_list;

pub use cache::ListCache;
pub use posting_list::{FlushOutcome, FlushState, ListGuard, PostingList};
