//! Core types for Palisade
//!
//! This crate defines the foundational types used throughout the system:
//! - TxId: Transaction identifier doubling as the MVCC version stamp
//! - ChangeId: Opaque key for write-write conflict comparison
//! - Transaction: Client-side handle carrying the read-visibility snapshot
//! - Error: Error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod transaction;
pub mod types;

pub use error::{Error, Result};
pub use transaction::Transaction;
pub use types::{now_millis, ChangeId, TxId, MAX_TX_PER_MS};
