//! In-memory transaction state and lifecycle transitions.
//!
//! `TransactionState` owns the authoritative [`TransactionSnapshot`] plus the
//! id allocator. Every lifecycle operation validates its preconditions,
//! produces the [`TransactionEdit`] describing the transition, and applies it
//! through `TransactionSnapshot::apply_edit` before returning the edit to the
//! caller for durable logging. Recovery replays the same edits through the
//! same path, so live state and recovered state cannot diverge.
//!
//! All methods take `&mut self`; the manager serializes access behind one
//! exclusive lock.

use palisade_core::{now_millis, ChangeId, Error, Result, Transaction, TxId, MAX_TX_PER_MS};
use palisade_durability::{TransactionEdit, TransactionSnapshot};
use std::collections::BTreeSet;
use std::ops::Bound::{Excluded, Unbounded};
use std::time::Duration;
use tracing::warn;

/// Monotonic transaction id allocator.
///
/// Ids are `millis * MAX_TX_PER_MS + sequence`. The allocator never re-issues
/// an id, including across clock rollback: if the wall clock reads earlier
/// than the last issued millisecond, allocation continues in the last slot
/// until either the counter runs out or the clock catches up. A full slot
/// blocks the caller for the remainder of the millisecond.
#[derive(Debug)]
struct IdAllocator {
    last_millis: u64,
    counter: u64,
}

impl IdAllocator {
    /// Allocator that will only issue ids strictly greater than `floor`.
    ///
    /// `floor` is the highest id observed during recovery, so restarted
    /// managers keep the global id sequence monotonic.
    fn seeded(floor: TxId) -> Self {
        IdAllocator {
            last_millis: floor.millis(),
            counter: floor.sequence() + 1,
        }
    }

    fn next(&mut self) -> TxId {
        loop {
            let now = now_millis();
            if now > self.last_millis {
                self.last_millis = now;
                self.counter = 0;
            } else if now < self.last_millis && self.counter >= MAX_TX_PER_MS {
                warn!(
                    now,
                    last = self.last_millis,
                    "Clock behind last issued id and sequence exhausted, waiting"
                );
            }
            if self.counter < MAX_TX_PER_MS {
                let id = TxId::from_parts(self.last_millis, self.counter);
                self.counter += 1;
                return id;
            }
            // Slot full. Wait for the clock to pass last_millis.
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

/// The authoritative transaction state behind the manager's lock.
pub struct TransactionState {
    snap: TransactionSnapshot,
    alloc: IdAllocator,
}

impl TransactionState {
    /// Fresh state with no history.
    pub fn new() -> Self {
        TransactionState {
            snap: TransactionSnapshot::empty(now_millis()),
            alloc: IdAllocator::seeded(TxId::ZERO),
        }
    }

    /// State rebuilt by recovery, with the allocator floored at the highest
    /// recovered id.
    pub fn recovered(snap: TransactionSnapshot) -> Self {
        let floor = snap.last_transaction_id;
        TransactionState {
            snap,
            alloc: IdAllocator::seeded(floor),
        }
    }

    /// Read access to the current state.
    pub fn snapshot(&self) -> &TransactionSnapshot {
        &self.snap
    }

    /// Timestamped capture of the current state for durable persistence.
    pub fn capture(&self) -> TransactionSnapshot {
        let mut snap = self.snap.clone();
        snap.timestamp_millis = now_millis();
        snap
    }

    /// Start a transaction expiring `timeout` from now.
    ///
    /// Returns the client handle and the edit to log. The handle carries the
    /// current visibility upper bound and invalid set; the transaction reads
    /// against that capture for its whole lifetime.
    pub fn start(&mut self, timeout: Duration) -> (Transaction, TransactionEdit) {
        let id = self.alloc.next();
        let expiration_millis = now_millis().saturating_add(timeout.as_millis() as u64);
        let edit = TransactionEdit::Started {
            id,
            expiration_millis,
            visibility_upper_bound: self.snap.visibility_upper_bound,
        };
        self.snap.apply_edit(&edit);
        let handle = Transaction::new(
            id,
            self.snap.visibility_upper_bound,
            self.snap.invalid.clone(),
        );
        (handle, edit)
    }

    /// Start a transaction that never expires by timeout.
    ///
    /// Long-running work (bulk loads, compactions) uses this; such a
    /// transaction only leaves the in-progress set by commit, abort, or
    /// explicit invalidation.
    pub fn start_long_running(&mut self) -> (Transaction, TransactionEdit) {
        let id = self.alloc.next();
        let edit = TransactionEdit::Started {
            id,
            expiration_millis: u64::MAX,
            visibility_upper_bound: self.snap.visibility_upper_bound,
        };
        self.snap.apply_edit(&edit);
        let handle = Transaction::new(
            id,
            self.snap.visibility_upper_bound,
            self.snap.invalid.clone(),
        );
        (handle, edit)
    }

    /// First commit phase: detect write-write conflicts and record the
    /// change set.
    ///
    /// Errors with [`Error::ExpiredTransaction`] when `id` is no longer in
    /// progress (timed out, invalidated, or already completed), or
    /// [`Error::Conflict`] when a transaction that committed after `id`
    /// started wrote an overlapping change. A conflicting transaction must
    /// be aborted by the caller.
    pub fn can_commit(
        &mut self,
        id: TxId,
        change_set: BTreeSet<ChangeId>,
    ) -> Result<TransactionEdit> {
        let started = self
            .snap
            .in_progress
            .get(&id)
            .ok_or(Error::ExpiredTransaction(id))?;
        self.check_conflict(id, started.visibility_upper_bound, &change_set)?;

        let edit = TransactionEdit::Committing { id, change_set };
        self.snap.apply_edit(&edit);
        Ok(edit)
    }

    /// Second commit phase: make the transaction's writes visible.
    ///
    /// Re-runs conflict detection first: another transaction may have
    /// committed an overlapping change between `can_commit` and here.
    /// Committing without a prior `can_commit` commits an empty change set,
    /// which is legal for read-only transactions.
    pub fn commit(&mut self, id: TxId) -> Result<TransactionEdit> {
        let started = self
            .snap
            .in_progress
            .get(&id)
            .ok_or(Error::ExpiredTransaction(id))?;
        let bound = started.visibility_upper_bound;
        let change_set = self
            .snap
            .committing_change_sets
            .get(&id)
            .cloned()
            .unwrap_or_default();
        if !change_set.is_empty() {
            self.check_conflict(id, bound, &change_set)?;
        }
        let edit = TransactionEdit::Committed { id, change_set };
        self.snap.apply_edit(&edit);
        Ok(edit)
    }

    /// Overlap check against commits invisible to the transaction at start.
    ///
    /// Only change sets with commit id strictly above the transaction's
    /// start-time visibility bound can conflict; everything at or below it
    /// was already visible when the transaction began.
    fn check_conflict(&self, id: TxId, bound: TxId, change_set: &BTreeSet<ChangeId>) -> Result<()> {
        for (committed_id, committed_set) in self
            .snap
            .committed_change_sets
            .range((Excluded(bound), Unbounded))
        {
            if let Some(change) = change_set.intersection(committed_set).next() {
                return Err(Error::Conflict {
                    id,
                    change: change.clone(),
                    conflicting: *committed_id,
                });
            }
        }
        Ok(())
    }

    /// Abort an in-progress transaction. Its id is discarded without joining
    /// the invalid set; the caller guarantees no writes stamped with it
    /// persist in the store.
    pub fn abort(&mut self, id: TxId) -> Result<TransactionEdit> {
        if !self.snap.in_progress.contains_key(&id) {
            return Err(Error::ExpiredTransaction(id));
        }
        let edit = TransactionEdit::Aborted { id };
        self.snap.apply_edit(&edit);
        Ok(edit)
    }

    /// Move an in-progress transaction to the invalid set.
    ///
    /// Used when the transaction's writes may persist in the store (client
    /// died mid-write, rollback failed); every future reader will skip them
    /// until store-side cleanup removes the data and the id is truncated.
    pub fn invalidate(&mut self, id: TxId) -> Result<TransactionEdit> {
        if !self.snap.in_progress.contains_key(&id) {
            return Err(Error::ExpiredTransaction(id));
        }
        let edit = TransactionEdit::Invalidated { id };
        self.snap.apply_edit(&edit);
        Ok(edit)
    }

    /// Drop invalid ids below `before`.
    ///
    /// Safe only once store-side cleanup has physically removed every
    /// version those transactions wrote; the caller asserts that.
    pub fn truncate_invalid(&mut self, before: TxId) -> TransactionEdit {
        let edit = TransactionEdit::InvalidTruncated { before };
        self.snap.apply_edit(&edit);
        edit
    }

    /// In-progress transactions whose deadline is at or before `now`.
    ///
    /// Long-running transactions (deadline `u64::MAX`) never appear here.
    pub fn expired(&self, now: u64) -> Vec<TxId> {
        self.snap
            .in_progress
            .iter()
            .filter(|(_, tx)| tx.expiration_millis <= now)
            .map(|(id, _)| *id)
            .collect()
    }
}

impl Default for TransactionState {
    fn default() -> Self {
        TransactionState::new()
    }
}
