//! A single posting list: one key's postings plus its unflushed mutations.
//!
//! # Layers
//!
//! - `committed`: the postings last written to (or read from) the store,
//!   sorted by target uid. Only `Set` postings are ever committed.
//! - `pending`: at most one operation per target uid, each stamped with a
//!   sequence number when it was recorded.
//!
//! The resolved view applies `pending` over `committed`: a pending `Set`
//! replaces the committed posting for its target, a pending `Delete` removes
//! it.
//!
//! # Flush State Machine
//!
//! ```text
//! Clean --mutation--> Dirty --claim--> Flushing --success--> Clean
//!                       ^                  |
//!                       +---failure--------+
//!                       +---success, newer pending entries remain
//! ```
//!
//! A flush captures the resolved view and the current sequence mark, then
//! releases the lock for the store write. On success only pending entries
//! with `seq < mark` are retired, so mutations that land while the write is
//! in flight survive and leave the list `Dirty`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::EngineError;
use crate::storage::{Store, StoreError};
use crate::types::{
    DirectedEdge, Op, Posting, Target, Uid, Value, decode_postings, encode_postings,
};

/// Lifecycle of a list relative to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// The store holds the resolved view.
    Clean,
    /// Pending mutations have not been written.
    Dirty,
    /// A flush has captured a snapshot and is writing it.
    Flushing,
}

/// Result of one flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing to do: the list was clean or another flush owns it.
    Skipped,
    /// The snapshot was written and no newer mutations remain.
    Clean,
    /// The snapshot was written but the list must be flushed again.
    StillDirty,
}

#[derive(Debug)]
struct PendingEntry {
    posting: Posting,
    seq: u64,
}

#[derive(Debug)]
struct ListState {
    committed: Vec<Posting>,
    pending: BTreeMap<Uid, PendingEntry>,
    flush: FlushState,
    next_seq: u64,
    /// Bumped when the committed layer is replaced from outside a flush.
    generation: u64,
}

/// Snapshot claimed by a flush.
#[derive(Debug)]
struct FlushTicket {
    postings: Vec<Posting>,
    mark: u64,
    generation: u64,
}

/// One key's posting list.
///
/// # Invariants
///
/// - `committed` is sorted by target uid and holds only `Set` postings,
///   unless the store handed us a corrupt list (reported by `resolve`)
/// - `pending` holds at most one entry per target uid
/// - the list is `Clean` only if `pending` is empty
#[derive(Debug)]
pub struct PostingList {
    key: Vec<u8>,
    state: Mutex<ListState>,
    /// Set while the list sits in the commit queue.
    queued: AtomicBool,
}

impl PostingList {
    /// An empty list for `key`.
    #[must_use]
    pub fn new(key: Vec<u8>) -> Self {
        Self::with_committed(key, Vec::new())
    }

    /// A list whose committed layer is `postings`.
    #[must_use]
    pub fn with_committed(key: Vec<u8>, postings: Vec<Posting>) -> Self {
        Self {
            key,
            state: Mutex::new(ListState {
                committed: postings,
                pending: BTreeMap::new(),
                flush: FlushState::Clean,
                next_seq: 0,
                generation: 0,
            }),
            queued: AtomicBool::new(false),
        }
    }

    /// Read `key` from the store. A missing key yields an empty list.
    pub fn load(store: &dyn Store, key: &[u8]) -> Result<Self, EngineError> {
        let postings = match store.get(key)? {
            Some(bytes) => decode_postings(&bytes).map_err(|e| {
                EngineError::Io(StoreError::Corruption(format!(
                    "undecodable posting list: {e}"
                )))
            })?,
            None => Vec::new(),
        };
        Ok(Self::with_committed(key.to_vec(), postings))
    }

    /// The encoded key this list is stored under.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Lock the list for a sequence of operations.
    pub fn lock(&self) -> Result<ListGuard<'_>, EngineError> {
        self.state
            .lock()
            .map(|state| ListGuard {
                key: &self.key,
                state,
            })
            .map_err(|_| EngineError::LockPoisoned)
    }

    /// Record a mutation. See [`ListGuard::add_mutation`].
    pub fn add_mutation(&self, edge: &DirectedEdge, ts: u64) -> Result<bool, EngineError> {
        self.lock()?.add_mutation(edge, ts)
    }

    /// The resolved postings, sorted by target uid.
    pub fn resolve(&self) -> Result<Vec<Posting>, EngineError> {
        self.lock()?.resolve()
    }

    /// Resolved postings whose target uid is greater than `from_uid`.
    pub fn iterate(&self, from_uid: u64) -> Result<Vec<Posting>, EngineError> {
        Ok(self
            .resolve()?
            .into_iter()
            .filter(|p| p.uid().0 > from_uid)
            .collect())
    }

    /// Number of resolved postings.
    pub fn len(&self) -> Result<usize, EngineError> {
        Ok(self.resolve()?.len())
    }

    /// Whether the resolved view is empty.
    pub fn is_empty(&self) -> Result<bool, EngineError> {
        Ok(self.len()? == 0)
    }

    /// The resolved scalar value of a data list.
    pub fn value(&self) -> Result<Option<Value>, EngineError> {
        self.lock()?.value()
    }

    /// Resolved entity targets, ascending.
    pub fn uids(&self) -> Result<Vec<u64>, EngineError> {
        Ok(self
            .resolve()?
            .iter()
            .filter_map(|p| match p.target {
                Target::Uid(uid) => Some(uid.0),
                Target::Value(_) => None,
            })
            .collect())
    }

    /// Current flush state.
    pub fn flush_state(&self) -> Result<FlushState, EngineError> {
        Ok(self.lock()?.state.flush)
    }

    /// Whether the store already holds the resolved view.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.state
            .lock()
            .is_ok_and(|state| state.flush == FlushState::Clean)
    }

    /// Claim the queued flag. Returns false if the list is already queued.
    pub fn try_mark_queued(&self) -> bool {
        self.queued
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the queued flag.
    pub fn clear_queued(&self) {
        self.queued.store(false, Ordering::Release);
    }

    /// Whether the list sits in the commit queue.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.queued.load(Ordering::Acquire)
    }

    /// Write the resolved view to the store.
    ///
    /// The list lock is released for the duration of the store call. An
    /// empty resolved view deletes the key.
    ///
    /// # Post-conditions
    ///
    /// - On error the list is `Dirty` and no pending entry was retired
    pub fn flush(&self, store: &dyn Store) -> Result<FlushOutcome, EngineError> {
        let Some(ticket) = self.begin_flush()? else {
            return Ok(FlushOutcome::Skipped);
        };

        let written = if ticket.postings.is_empty() {
            store.delete(&self.key)
        } else {
            store.set(&self.key, &encode_postings(&ticket.postings))
        };

        match written {
            Ok(()) => self.finish_flush(ticket),
            Err(e) => {
                self.abort_flush()?;
                Err(EngineError::Io(e))
            }
        }
    }

    fn begin_flush(&self) -> Result<Option<FlushTicket>, EngineError> {
        let mut guard = self.lock()?;
        if guard.state.flush != FlushState::Dirty {
            return Ok(None);
        }
        let postings = guard.resolve()?;
        let state = &mut *guard.state;
        state.flush = FlushState::Flushing;
        Ok(Some(FlushTicket {
            postings,
            mark: state.next_seq,
            generation: state.generation,
        }))
    }

    fn finish_flush(&self, ticket: FlushTicket) -> Result<FlushOutcome, EngineError> {
        let mut guard = self.lock()?;
        let state = &mut *guard.state;

        if state.generation != ticket.generation {
            // The committed layer was replaced while we wrote; our write may
            // have clobbered it in the store.
            state.flush = FlushState::Dirty;
            return Ok(FlushOutcome::StillDirty);
        }

        state.committed = ticket.postings;
        state.pending.retain(|_, entry| entry.seq >= ticket.mark);
        if state.pending.is_empty() {
            state.flush = FlushState::Clean;
            Ok(FlushOutcome::Clean)
        } else {
            state.flush = FlushState::Dirty;
            Ok(FlushOutcome::StillDirty)
        }
    }

    fn abort_flush(&self) -> Result<(), EngineError> {
        self.lock()?.state.flush = FlushState::Dirty;
        Ok(())
    }

    /// Replace the committed layer and drop pending mutations.
    ///
    /// Used when the store contents for this key were rewritten directly. The
    /// list is left `Dirty` (or `Flushing`, which finishes as `StillDirty`),
    /// so the next flush rewrites `postings` over any stale write that
    /// landed after the direct rewrite. Callers put the key back in the
    /// dirty set.
    pub fn reset_committed(&self, postings: Vec<Posting>) -> Result<(), EngineError> {
        let mut guard = self.lock()?;
        let state = &mut *guard.state;
        state.committed = postings;
        state.pending.clear();
        state.generation += 1;
        if state.flush == FlushState::Clean {
            state.flush = FlushState::Dirty;
        }
        Ok(())
    }
}

/// Exclusive access to a locked list.
pub struct ListGuard<'a> {
    key: &'a [u8],
    state: MutexGuard<'a, ListState>,
}

impl ListGuard<'_> {
    /// Record `edge` as a pending mutation stamped with `ts`.
    ///
    /// Returns false when the mutation is older than the operation already
    /// recorded for the same target; such a mutation is dropped. Does no I/O.
    ///
    /// # Post-conditions
    ///
    /// - On `Ok(true)` the list is `Dirty`, or `Flushing` if a flush owns it
    pub fn add_mutation(&mut self, edge: &DirectedEdge, ts: u64) -> Result<bool, EngineError> {
        edge.validate().map_err(EngineError::InvalidEdge)?;
        Ok(self.add_posting(edge.to_posting(ts)))
    }

    /// Whether a posting for `uid` stamped `ts` would be recorded.
    #[must_use]
    pub fn would_accept(&self, uid: Uid, ts: u64) -> bool {
        let current = self.state.pending.get(&uid).map_or_else(
            || {
                self.state
                    .committed
                    .iter()
                    .find(|p| p.uid() == uid)
                    .map(|p| p.commit_ts)
            },
            |entry| Some(entry.posting.commit_ts),
        );
        current.is_none_or(|current| ts >= current)
    }

    /// Record an already validated posting. Same contract as `add_mutation`.
    pub fn add_posting(&mut self, posting: Posting) -> bool {
        let uid = posting.uid();
        if !self.would_accept(uid, posting.commit_ts) {
            tracing::debug!(
                "Ignoring posting at ts {} for target {uid}: a newer one is recorded",
                posting.commit_ts
            );
            return false;
        }
        self.record_posting(posting);
        true
    }

    /// Record `posting` without comparing it to the operation already
    /// recorded for its target.
    ///
    /// For lists derived from another list: the caller has already ordered
    /// the mutation against its source under the source's lock.
    pub fn record_posting(&mut self, posting: Posting) {
        let uid = posting.uid();
        let state = &mut *self.state;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.insert(uid, PendingEntry { posting, seq });
        if state.flush == FlushState::Clean {
            state.flush = FlushState::Dirty;
        }
    }

    /// The resolved postings, sorted by target uid.
    pub fn resolve(&self) -> Result<Vec<Posting>, EngineError> {
        let mut resolved: BTreeMap<Uid, Posting> = BTreeMap::new();
        for posting in &self.state.committed {
            if resolved.insert(posting.uid(), posting.clone()).is_some() {
                let message = format!(
                    "committed layer of key {:02x?} holds target {} twice",
                    self.key,
                    posting.uid()
                );
                tracing::error!("{message}");
                return Err(EngineError::ConflictingState(message));
            }
        }
        for (uid, entry) in &self.state.pending {
            match entry.posting.op {
                Op::Set => {
                    resolved.insert(*uid, entry.posting.clone());
                }
                Op::Delete => {
                    resolved.remove(uid);
                }
            }
        }
        Ok(resolved.into_values().collect())
    }

    /// The resolved scalar value.
    pub fn value(&self) -> Result<Option<Value>, EngineError> {
        Ok(self
            .resolve()?
            .into_iter()
            .find_map(|p| match p.target {
                Target::Value(value) => Some(value),
                Target::Uid(_) => None,
            }))
    }
}
