//! Client-side transaction handle.
//!
//! A `Transaction` is what `start()` hands back to a caller: the allocated id
//! plus the visibility snapshot (upper bound and invalid set) the caller must
//! use to filter stored versions while it runs. The handle is immutable; all
//! state transitions go through the manager.

use crate::types::TxId;
use serde::{Deserialize, Serialize};

/// A started transaction, as seen by the client.
///
/// The visibility predicate here is the single source of truth consumed by
/// every read path, including store-side cleanup hooks that filter with the
/// same rule against published state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// The transaction's id, also the version stamp its writes carry.
    pub id: TxId,
    /// Highest id fully committed and safe to read when this transaction started.
    pub visibility_upper_bound: TxId,
    /// Ids whose writes must be treated as if they never happened. Sorted.
    pub invalid: Vec<TxId>,
}

impl Transaction {
    /// Create a handle. `invalid` must be sorted ascending.
    pub fn new(id: TxId, visibility_upper_bound: TxId, invalid: Vec<TxId>) -> Self {
        debug_assert!(invalid.windows(2).all(|w| w[0] <= w[1]));
        Transaction {
            id,
            visibility_upper_bound,
            invalid,
        }
    }

    /// Whether a stored version written by `writer` is visible to this
    /// transaction.
    ///
    /// Visible iff the writer is at or below the visibility upper bound and
    /// not invalid, or the writer is this transaction itself
    /// (read-your-writes).
    pub fn is_visible(&self, writer: TxId) -> bool {
        if writer == self.id {
            return true;
        }
        writer <= self.visibility_upper_bound && self.invalid.binary_search(&writer).is_err()
    }
}
