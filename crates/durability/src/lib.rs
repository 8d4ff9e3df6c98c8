//! Durability layer for Palisade
//!
//! This crate handles everything that touches disk:
//!
//! - Snapshot model: `TransactionSnapshot` and the replayable `TransactionEdit`
//! - Versioned snapshot codecs (bincode v1, MessagePack v2) behind a registry
//! - SnapshotStore: timestamp-named snapshot files plus edit logs, with
//!   retention pruning and crash-tolerant recovery reads
//! - Published-state access: `StateCache` polling the latest durable snapshot
//!   for external consumers, and the version-filter rules those consumers
//!   apply during store-side cleanup

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod filter;
pub mod published;
pub mod snapshot_types;
pub mod store;

pub use codec::{BincodeCodec, CodecRegistry, MessagePackCodec, SnapshotCodec};
pub use filter::{FamilyPolicy, PublishedState, VersionAction};
pub use published::StateCache;
pub use snapshot_types::{InProgressTx, TransactionEdit, TransactionSnapshot};
pub use store::{SnapshotFileInfo, SnapshotStore};
