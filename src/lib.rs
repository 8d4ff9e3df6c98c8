//! Palisade - snapshot-isolation transaction manager for multi-versioned
//! key-value stores
//!
//! Palisade provides the transaction authority for an external MVCC store:
//! it allocates transaction ids that double as version stamps, detects
//! write-write conflicts at commit time, tracks invalidated writers so their
//! data is never read, and persists its state through checkpoints plus an
//! edit log for crash recovery.
//!
//! # Quick Start
//!
//! ```ignore
//! use palisade::{TransactionManager, TxManagerConfig};
//!
//! let manager = TransactionManager::open(TxManagerConfig::new("/var/lib/palisade"))?;
//!
//! let tx = manager.start()?;
//! // ... write to the store stamping versions with tx.id,
//! //     read filtering versions through tx.is_visible(...) ...
//! manager.can_commit(tx.id, changes)?;
//! manager.commit(tx.id)?;
//! ```
//!
//! # Architecture
//!
//! The [`TransactionManager`] is the single authority over transaction state;
//! everything it decides is expressed as a replayable edit, logged durably,
//! and periodically folded into a full snapshot. Store-side cleanup hooks in
//! other processes consume published snapshots through [`StateCache`] and
//! [`PublishedState`] without ever talking to the live manager.

pub use palisade_concurrency::{ConfigError, TransactionManager, TxManagerConfig};
pub use palisade_core::{
    now_millis, ChangeId, Error, Result, Transaction, TxId, MAX_TX_PER_MS,
};
pub use palisade_durability::{
    BincodeCodec, CodecRegistry, FamilyPolicy, MessagePackCodec, PublishedState, SnapshotCodec,
    SnapshotStore, StateCache, TransactionEdit, TransactionSnapshot, VersionAction,
};
