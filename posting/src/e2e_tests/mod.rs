//! End-to-end tests at the engine level.
//!
//! Each test file covers one scenario against a full engine over an
//! in-memory store, checking what ends up in the store.

#![cfg(test)]

mod helpers;

mod test_commit_pipeline;
mod test_concurrency;
mod test_rebuild_index;
mod test_tokens_table;
