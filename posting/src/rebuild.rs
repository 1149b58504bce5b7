//! Value-index rebuild.
//!
//! Recomputes an attribute's index from its data lists and rewrites the
//! stored index so it matches exactly: missing tokens are written, stale
//! tokens are deleted, and tokens that already hold the right entities are
//! left alone. Running it twice in a row writes nothing the second time.
//!
//! # Phases
//!
//! 1. Desired index: every data list of the attribute, from the store and
//!    from the cache (a cached list's resolved view wins), tokenized.
//! 2. Stored index: every key under the attribute's index prefix. A value
//!    that does not decode counts as garbage and will be replaced or deleted.
//! 3. Diff and write, then reset cached index lists to the rebuilt state.
//!    A commit worker may still be writing a snapshot it took before the
//!    rebuild, so reset lists go back into the dirty set and the next
//!    checkpoint writes the rebuilt entries again.
//!
//! The attribute lock is held exclusively throughout, so no indexed mutation
//! of the attribute interleaves. Cancellation is checked between phases; a
//! rebuild cancelled before phase 3 has written nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::storage::{ParsedKey, data_prefix, index_key, index_prefix};
use crate::tokenizer::{Token, tokenize};
use crate::types::{
    Op, Posting, Target, Uid, Value, ValueType, decode_postings, encode_postings,
};

/// Counters reported by a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RebuildStats {
    /// Data lists examined.
    pub entities_scanned: usize,
    /// Index keys written.
    pub tokens_written: usize,
    /// Index keys deleted.
    pub tokens_deleted: usize,
    /// Keys under the attribute's prefixes that could not be decoded.
    pub malformed_keys: usize,
}

/// Timestamp of rebuilt index postings. Every recorded mutation of an
/// entity supersedes its rebuilt entries.
const REBUILT_TS: u64 = 0;

type TokenMap = BTreeMap<Token, BTreeSet<Uid>>;

impl Engine {
    /// Rebuild the value index of `attribute` from its data.
    ///
    /// # Errors
    ///
    /// - `UnknownAttribute` / `NotIndexed` if the attribute has no index
    /// - `Cancelled` if `cancel` fired before the write phase
    /// - `Io` if the store fails; writes already made stay in place and a
    ///   second run completes the rebuild
    pub fn rebuild_index(
        &self,
        attribute: &str,
        cancel: &CancellationToken,
    ) -> Result<RebuildStats, EngineError> {
        let attr_schema = self
            .schema
            .get(attribute)
            .ok_or_else(|| EngineError::UnknownAttribute(attribute.to_string()))?;
        if !attr_schema.indexed {
            return Err(EngineError::NotIndexed(attribute.to_string()));
        }

        let attr_lock = self.attribute_lock(attribute)?;
        let _exclusive = attr_lock.write().map_err(|_| EngineError::LockPoisoned)?;
        tracing::info!("Rebuilding index of '{attribute}'");

        let mut stats = RebuildStats::default();
        check_cancelled(cancel)?;

        let desired = self.desired_index(attribute, attr_schema.value_type, &mut stats)?;
        check_cancelled(cancel)?;

        let stored = self.stored_index(attribute, &mut stats)?;
        check_cancelled(cancel)?;

        for (token, uids) in &desired {
            if stored.get(token).is_some_and(|s| s.as_ref() == Some(uids)) {
                continue;
            }
            let postings = index_postings(uids);
            self.store()
                .set(&index_key(attribute, token), &encode_postings(&postings))?;
            stats.tokens_written += 1;
        }
        for token in stored.keys().filter(|t| !desired.contains_key(*t)) {
            self.store().delete(&index_key(attribute, token))?;
            stats.tokens_deleted += 1;
        }

        for list in self.cache.lists_with_prefix(&index_prefix(attribute))? {
            let parsed = ParsedKey::parse(list.key())?;
            let postings = parsed
                .token()
                .and_then(|token| desired.get(token))
                .map(index_postings)
                .unwrap_or_default();
            list.reset_committed(postings)?;
            self.cache.mark_dirty(list.key())?;
        }

        tracing::info!(
            "Rebuilt index of '{attribute}': {} entities, {} tokens written, {} deleted, {} malformed keys",
            stats.entities_scanned,
            stats.tokens_written,
            stats.tokens_deleted,
            stats.malformed_keys
        );
        Ok(stats)
    }

    /// Run `rebuild_index` on the blocking pool.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn spawn_rebuild(
        self: &Arc<Self>,
        attribute: String,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<RebuildStats, EngineError>> {
        let engine = Arc::clone(self);
        tokio::task::spawn_blocking(move || engine.rebuild_index(&attribute, &cancel))
    }

    /// Token -> entities implied by the attribute's data lists.
    fn desired_index(
        &self,
        attribute: &str,
        value_type: ValueType,
        stats: &mut RebuildStats,
    ) -> Result<TokenMap, EngineError> {
        let mut values: BTreeMap<Uid, Option<Value>> = BTreeMap::new();

        for (key, bytes) in self.store().scan_prefix(&data_prefix(attribute))? {
            let uid = match ParsedKey::parse(&key) {
                Ok(parsed) => match parsed.uid() {
                    Some(uid) => uid,
                    None => continue,
                },
                Err(e) => {
                    tracing::warn!("Skipping data key {key:02x?}: {e}");
                    stats.malformed_keys += 1;
                    continue;
                }
            };
            match decode_postings(&bytes) {
                Ok(postings) => {
                    let value = postings.into_iter().find_map(|p| match p.target {
                        Target::Value(value) => Some(value),
                        Target::Uid(_) => None,
                    });
                    values.insert(uid, value);
                }
                Err(e) => {
                    tracing::warn!("Skipping undecodable data list of entity {uid}: {e}");
                    stats.malformed_keys += 1;
                }
            }
        }

        for list in self.cache.lists_with_prefix(&data_prefix(attribute))? {
            let Some(uid) = ParsedKey::parse(list.key())?.uid() else {
                continue;
            };
            values.insert(uid, list.value()?);
        }

        stats.entities_scanned = values.len();
        let mut desired = TokenMap::new();
        for (uid, value) in values {
            let Some(value) = value else { continue };
            match tokenize(value_type, &value) {
                Ok(tokens) => {
                    for token in tokens {
                        desired.entry(token).or_default().insert(uid);
                    }
                }
                Err(e) => {
                    tracing::warn!("Value of '{attribute}' for entity {uid} is not indexable: {e}");
                }
            }
        }
        Ok(desired)
    }

    /// Token -> entities currently stored. `None` marks an undecodable value.
    fn stored_index(
        &self,
        attribute: &str,
        stats: &mut RebuildStats,
    ) -> Result<BTreeMap<Token, Option<BTreeSet<Uid>>>, EngineError> {
        let mut stored = BTreeMap::new();
        for (key, bytes) in self.store().scan_prefix(&index_prefix(attribute))? {
            let token = match ParsedKey::parse(&key) {
                Ok(parsed) => match parsed.token() {
                    Some(token) => token.clone(),
                    None => continue,
                },
                Err(e) => {
                    tracing::warn!("Skipping index key {key:02x?}: {e}");
                    stats.malformed_keys += 1;
                    continue;
                }
            };
            let uids = decode_postings(&bytes).ok().map(|postings| {
                postings
                    .iter()
                    .filter(|p| p.op == Op::Set)
                    .map(Posting::uid)
                    .collect()
            });
            if uids.is_none() {
                tracing::debug!("Index entry {token} holds garbage");
            }
            stored.insert(token, uids);
        }
        Ok(stored)
    }
}

fn index_postings(uids: &BTreeSet<Uid>) -> Vec<Posting> {
    uids.iter()
        .map(|uid| Posting {
            target: Target::Uid(*uid),
            op: Op::Set,
            commit_ts: REBUILT_TS,
            label: None,
        })
        .collect()
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), EngineError> {
    if cancel.is_cancelled() {
        tracing::info!("Index rebuild cancelled");
        return Err(EngineError::Cancelled);
    }
    Ok(())
}
