//! Transaction manager for Palisade
//!
//! This crate implements the single-authority transaction protocol:
//! - TransactionState: the in-memory data model behind one exclusive section
//! - Monotonic transaction id allocation (timestamp + sequence counter)
//! - Lifecycle operations: start, can_commit, commit, abort, invalidate
//! - Write-write conflict detection at commit time
//! - Expiration sweep and periodic checkpointing on background timers
//! - Startup recovery from the durable snapshot store

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod manager;
pub mod state;

pub use config::{ConfigError, TxManagerConfig};
pub use manager::TransactionManager;
pub use state::TransactionState;
