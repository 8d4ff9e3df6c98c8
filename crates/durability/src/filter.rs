//! Version filtering rules for store-side cleanup.
//!
//! The storage engine's compaction hook consumes published transaction state
//! and decides, per stored version, whether the version can be discarded.
//! The rules here are the single definition of that contract:
//!
//! - a version written by an invalid transaction is always dropped;
//! - a version above the visibility upper bound belongs to an in-flight
//!   transaction and is never cleanup's business;
//! - a version older than its column family's TTL is dropped, where age is
//!   measured against the snapshot's visibility-bound-implied time, not
//!   wall-clock now — a deliberately preserved semantic, since it decides
//!   which versions a compaction pass may discard;
//! - families configured to retain only the latest version keep a single
//!   newest visible survivor per column (plus any in-flight versions).

use crate::snapshot_types::TransactionSnapshot;
use palisade_core::TxId;
use std::collections::HashMap;

/// Cleanup policy for one column family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FamilyPolicy {
    /// Maximum age of a visible version, in milliseconds. `None` keeps
    /// versions indefinitely.
    pub ttl_millis: Option<u64>,
    /// Whether only the newest visible version per column survives.
    pub retain_latest_only: bool,
}

/// Verdict for a single stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionAction {
    /// The version survives this cleanup pass.
    Keep,
    /// Dropped: written by an invalidated transaction.
    DropInvalid,
    /// Dropped: older than the family TTL relative to the snapshot's
    /// reference time.
    DropExpired,
}

/// The read-only state an external cleanup consumer works from:
/// visibility bound, invalid set, and per-family policies.
#[derive(Debug, Clone, Default)]
pub struct PublishedState {
    /// Highest id fully committed at the time of the underlying snapshot.
    pub visibility_upper_bound: TxId,
    /// Invalidated transaction ids, sorted ascending.
    pub invalid: Vec<TxId>,
    /// Cleanup policy per column family name.
    pub families: HashMap<String, FamilyPolicy>,
}

impl PublishedState {
    /// Build from a durable snapshot plus the consumer's family policies.
    ///
    /// TTLs live with the storage engine's schema, not with transaction
    /// state, which is why they arrive separately.
    pub fn from_snapshot(
        snapshot: &TransactionSnapshot,
        families: HashMap<String, FamilyPolicy>,
    ) -> Self {
        PublishedState {
            visibility_upper_bound: snapshot.visibility_upper_bound,
            invalid: snapshot.invalid.clone(),
            families,
        }
    }

    fn policy(&self, family: &str) -> FamilyPolicy {
        self.families.get(family).copied().unwrap_or_default()
    }

    /// Classify one stored version written by `writer` in `family`.
    pub fn classify(&self, family: &str, writer: TxId) -> VersionAction {
        if self.invalid.binary_search(&writer).is_ok() {
            return VersionAction::DropInvalid;
        }
        if writer > self.visibility_upper_bound {
            // In-flight write: its fate is the manager's to decide.
            return VersionAction::Keep;
        }
        if let Some(ttl) = self.policy(family).ttl_millis {
            let age = self
                .visibility_upper_bound
                .millis()
                .saturating_sub(writer.millis());
            if age > ttl {
                return VersionAction::DropExpired;
            }
        }
        VersionAction::Keep
    }

    /// Filter one column's versions, newest first, returning the survivors
    /// in the same order.
    ///
    /// For retain-latest-only families, all in-flight versions survive plus
    /// the single newest visible one.
    pub fn filter_column(&self, family: &str, versions_newest_first: &[TxId]) -> Vec<TxId> {
        let policy = self.policy(family);
        let mut survivors = Vec::new();
        let mut kept_visible = false;
        for &writer in versions_newest_first {
            if self.classify(family, writer) != VersionAction::Keep {
                continue;
            }
            let visible = writer <= self.visibility_upper_bound;
            if visible && policy.retain_latest_only {
                if kept_visible {
                    continue;
                }
                kept_visible = true;
            }
            survivors.push(writer);
        }
        survivors
    }
}
