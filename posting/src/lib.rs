// Life of a mutation:
// 1. A directed edge comes in
// 2. Validate it and convert its value to the attribute's declared type
// 3. Indexed attributes: tokenize the old and new values, then update the
//    data list and every affected index list under their locks
// 4. Touched lists join the dirty set
// 5. The commit pipeline (or a synchronous checkpoint) writes dirty lists
//    to the store
//
// System components:
//  - Ordered key-value store
//  - Posting-list cache
//  - Commit pipeline
//  - Index rebuilder

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod clock;
pub mod commit;
pub mod config;
pub mod engine;
pub mod error;
pub mod list;
pub mod rebuild;
pub mod schema;
pub mod storage;
pub mod tokenizer;
pub mod types;

#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
mod testing;

pub use commit::CommitPipeline;
pub use engine::{CommitStats, Engine};
pub use error::EngineError;
pub use rebuild::RebuildStats;
