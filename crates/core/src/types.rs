//! Transaction identifiers and change identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of transaction ids that can be issued per millisecond.
///
/// A `TxId` is `millis * MAX_TX_PER_MS + sequence`, so the sequence counter
/// wraps into the next millisecond slot only by waiting for the clock.
pub const MAX_TX_PER_MS: u64 = 1_000_000;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// Transaction identifier.
///
/// Combines a millisecond timestamp with a per-millisecond sequence counter,
/// giving a total order consistent with wall-clock start time. The id is also
/// the MVCC version stamp the owning transaction writes with, so the implied
/// wall-clock time of a stored version can be recovered via [`TxId::millis`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TxId(u64);

impl TxId {
    /// Zero id, ordered before every issued id.
    pub const ZERO: TxId = TxId(0);

    /// Construct from a raw `u64` value.
    pub const fn from_raw(raw: u64) -> Self {
        TxId(raw)
    }

    /// Construct from a millisecond timestamp and a sequence counter.
    ///
    /// `sequence` must be below [`MAX_TX_PER_MS`]; callers enforce this.
    pub const fn from_parts(millis: u64, sequence: u64) -> Self {
        TxId(millis * MAX_TX_PER_MS + sequence)
    }

    /// Raw `u64` value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Implied wall-clock time of this id, in milliseconds.
    pub const fn millis(self) -> u64 {
        self.0 / MAX_TX_PER_MS
    }

    /// Sequence counter within the id's millisecond.
    pub const fn sequence(self) -> u64 {
        self.0 % MAX_TX_PER_MS
    }

    /// The id ordered immediately before this one.
    ///
    /// Saturates at zero so visibility math on the first id cannot wrap.
    pub const fn prev(self) -> Self {
        TxId(self.0.saturating_sub(1))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TxId {
    fn from(raw: u64) -> Self {
        TxId(raw)
    }
}

/// Opaque identifier for a unit of data written by a transaction.
///
/// Typically a row/family/qualifier key in the consuming store; the manager
/// only compares change ids for equality, so the encoding is the caller's
/// concern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeId(Vec<u8>);

impl ChangeId {
    /// Construct from raw key bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        ChangeId(bytes)
    }

    /// Key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for ChangeId {
    fn from(s: &str) -> Self {
        ChangeId(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for ChangeId {
    fn from(bytes: Vec<u8>) -> Self {
        ChangeId(bytes)
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{}", s),
            Err(_) => {
                for b in &self.0 {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}
