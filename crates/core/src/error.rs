//! Error types for Palisade
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::types::{ChangeId, TxId};
use std::io;
use thiserror::Error;

/// Result type alias for Palisade operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the transaction manager and its durability layer
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (snapshot store file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Write-write conflict detected at commit time.
    ///
    /// Not retryable for this transaction: the caller must abort.
    #[error("transaction {id} conflicts with committed transaction {conflicting} on change {change}")]
    Conflict {
        /// The transaction attempting to commit
        id: TxId,
        /// The overlapping change identifier
        change: ChangeId,
        /// The already-committed transaction that wrote the same change
        conflicting: TxId,
    },

    /// Operation referenced a transaction that is no longer in progress
    #[error("transaction {0} is not in progress (expired, invalidated, or already completed)")]
    ExpiredTransaction(TxId),

    /// Snapshot carried a codec version tag no registered codec understands
    #[error("unsupported snapshot codec version {0}")]
    UnsupportedCodecVersion(u8),

    /// Checksum or framing failure in a durable file
    #[error("data corruption: {0}")]
    Corruption(String),

    /// No decodable snapshot and no fallback during startup recovery
    #[error("recovery failed: {0}")]
    RecoveryFailed(String),

    /// Invalid operation or state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
