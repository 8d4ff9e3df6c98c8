//! Transaction snapshot model and replayable edits.
//!
//! `TransactionSnapshot` is the unit of durable persistence and of external
//! publication: an immutable capture of the manager's full state.
//! `TransactionEdit` is one replayable mutation of that state; the live
//! manager and recovery replay share `TransactionSnapshot::apply_edit` as the
//! single mutation path, so a state rebuilt from snapshot-plus-edits is
//! bit-for-bit the state the manager held.
//!
//! Replaying a complete edit log more than once converges to the same state:
//! every apply is written so that a second pass over the same sequence ends
//! where the first did.

use palisade_core::{ChangeId, TxId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Metadata for a transaction that has started but not yet completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InProgressTx {
    /// Absolute deadline (wall-clock millis); the sweep invalidates past it.
    pub expiration_millis: u64,
    /// The visibility upper bound captured when this transaction started.
    ///
    /// Conflict detection compares the transaction's change set against
    /// commits strictly newer than this bound.
    pub visibility_upper_bound: TxId,
}

/// Immutable, timestamped capture of the transaction manager's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TransactionSnapshot {
    /// Wall-clock millis at which the capture was taken.
    pub timestamp_millis: u64,
    /// Highest transaction id ever issued. New ids must exceed this even
    /// after a restart.
    pub last_transaction_id: TxId,
    /// Highest id known fully committed and safe for new readers.
    /// Non-decreasing.
    pub visibility_upper_bound: TxId,
    /// Ids whose writes must be treated as if they never happened. Sorted
    /// ascending; grows monotonically except for explicit truncation.
    pub invalid: Vec<TxId>,
    /// Started-but-not-completed transactions, keyed by id.
    pub in_progress: BTreeMap<TxId, InProgressTx>,
    /// Change sets recorded at `can_commit` time, consumed at `commit`.
    pub committing_change_sets: BTreeMap<TxId, BTreeSet<ChangeId>>,
    /// Change sets of committed transactions, retained only while some
    /// in-progress transaction could still conflict with them.
    pub committed_change_sets: BTreeMap<TxId, BTreeSet<ChangeId>>,
}

impl TransactionSnapshot {
    /// Empty state captured at `timestamp_millis`.
    pub fn empty(timestamp_millis: u64) -> Self {
        TransactionSnapshot {
            timestamp_millis,
            ..Default::default()
        }
    }

    /// Whether `writer`'s versions are visible under this snapshot alone
    /// (no own-id exception; that lives on the client handle).
    pub fn is_visible(&self, writer: TxId) -> bool {
        writer <= self.visibility_upper_bound && self.invalid.binary_search(&writer).is_err()
    }

    /// Apply one edit. Shared by the live manager and recovery replay.
    pub fn apply_edit(&mut self, edit: &TransactionEdit) {
        match edit {
            TransactionEdit::Started {
                id,
                expiration_millis,
                visibility_upper_bound,
            } => {
                self.in_progress.insert(
                    *id,
                    InProgressTx {
                        expiration_millis: *expiration_millis,
                        visibility_upper_bound: *visibility_upper_bound,
                    },
                );
                if *id > self.last_transaction_id {
                    self.last_transaction_id = *id;
                }
            }
            TransactionEdit::Committing { id, change_set } => {
                self.committing_change_sets.insert(*id, change_set.clone());
            }
            TransactionEdit::Committed { id, change_set } => {
                self.in_progress.remove(id);
                self.committing_change_sets.remove(id);
                if !change_set.is_empty() {
                    self.committed_change_sets.insert(*id, change_set.clone());
                }
                if *id > self.last_transaction_id {
                    self.last_transaction_id = *id;
                }
                self.advance_visibility();
                self.prune_committed();
            }
            TransactionEdit::Aborted { id } => {
                self.in_progress.remove(id);
                self.committing_change_sets.remove(id);
                // The aborted id may have been the only thing holding the
                // bound below already-committed newer ids.
                self.advance_visibility();
                self.prune_committed();
            }
            TransactionEdit::Invalidated { id } => {
                self.in_progress.remove(id);
                self.committing_change_sets.remove(id);
                if let Err(pos) = self.invalid.binary_search(id) {
                    self.invalid.insert(pos, *id);
                }
                self.advance_visibility();
                self.prune_committed();
            }
            TransactionEdit::InvalidTruncated { before } => {
                self.invalid.retain(|id| id >= before);
            }
        }
    }

    /// Advance the visibility upper bound after a transaction completed.
    ///
    /// The bound moves to one below the oldest remaining in-progress id.
    /// When nothing is in flight it moves to the highest id ever issued:
    /// every issued id has then committed, aborted, or been invalidated, so
    /// commits that landed out of order (a newer id committing before an
    /// older one resolved) become visible the moment the older id clears.
    /// The bound never moves backwards.
    fn advance_visibility(&mut self) {
        let candidate = match self.in_progress.keys().next() {
            Some(first) => first.prev(),
            None => self.last_transaction_id,
        };
        if candidate > self.visibility_upper_bound {
            self.visibility_upper_bound = candidate;
        }
    }

    /// Drop committed change sets no in-flight transaction can conflict with.
    ///
    /// A committed set is only consulted by transactions whose start-time
    /// visibility bound is below its commit id, so anything at or below the
    /// minimum bound across in-progress entries is dead weight. With nothing
    /// in flight every retained set is dead weight.
    fn prune_committed(&mut self) {
        let bound = self
            .in_progress
            .values()
            .map(|tx| tx.visibility_upper_bound)
            .min()
            .unwrap_or(self.last_transaction_id);
        self.committed_change_sets.retain(|id, _| *id > bound);
    }
}

/// One replayable mutation of transaction state.
///
/// Appended to the edit log between checkpoints so no committed fact is lost
/// if the process dies before the next snapshot. `Committed` carries the
/// change set so replay needs no surviving `Committing` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionEdit {
    /// A transaction started.
    Started {
        /// The allocated id.
        id: TxId,
        /// Absolute expiration deadline.
        expiration_millis: u64,
        /// Visibility bound captured at start.
        visibility_upper_bound: TxId,
    },
    /// A transaction passed conflict detection and recorded its change set.
    Committing {
        /// The committing transaction.
        id: TxId,
        /// The change identifiers it wrote.
        change_set: BTreeSet<ChangeId>,
    },
    /// A transaction committed.
    Committed {
        /// The committed transaction.
        id: TxId,
        /// Its change set, re-stated for self-contained replay.
        change_set: BTreeSet<ChangeId>,
    },
    /// A transaction aborted; the id is simply discarded.
    Aborted {
        /// The aborted transaction.
        id: TxId,
    },
    /// A transaction was moved to the invalid set.
    Invalidated {
        /// The invalidated transaction.
        id: TxId,
    },
    /// Invalid ids older than `before` were dropped.
    InvalidTruncated {
        /// Exclusive lower bound for surviving invalid ids.
        before: TxId,
    },
}
