//! Transaction manager configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for [`crate::TransactionManager`].
#[derive(Debug, Clone)]
pub struct TxManagerConfig {
    /// Directory for durable snapshots and edit logs.
    pub snapshot_dir: PathBuf,

    /// Default lifetime of a started transaction (default: 30s).
    ///
    /// The expiration sweep invalidates transactions past this deadline so
    /// readers are never blocked indefinitely behind a stalled writer.
    pub tx_timeout: Duration,

    /// Interval between expiration sweeps (default: 10s).
    pub sweep_interval: Duration,

    /// Interval between durable checkpoints (default: 5min).
    ///
    /// Between checkpoints every state mutation is appended to the edit log,
    /// so a longer interval costs recovery time, not durability.
    pub snapshot_interval: Duration,

    /// Number of newest snapshots kept by retention pruning (default: 10).
    ///
    /// Pruning additionally never deletes the last remaining fallback
    /// snapshot, regardless of this setting.
    pub snapshot_retain_count: usize,
}

impl TxManagerConfig {
    /// Configuration with defaults, persisting under `snapshot_dir`.
    pub fn new(snapshot_dir: impl Into<PathBuf>) -> Self {
        TxManagerConfig {
            snapshot_dir: snapshot_dir.into(),
            tx_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
            snapshot_interval: Duration::from_secs(300),
            snapshot_retain_count: 10,
        }
    }

    /// Set the default transaction timeout (builder pattern).
    pub fn with_tx_timeout(mut self, timeout: Duration) -> Self {
        self.tx_timeout = timeout;
        self
    }

    /// Set the expiration sweep interval (builder pattern).
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the checkpoint interval (builder pattern).
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    /// Set the snapshot retention count (builder pattern).
    pub fn with_snapshot_retain_count(mut self, count: usize) -> Self {
        self.snapshot_retain_count = count;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tx_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.sweep_interval.is_zero() || self.snapshot_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.snapshot_retain_count == 0 {
            return Err(ConfigError::ZeroRetention);
        }
        Ok(())
    }

    /// Configuration for tests: tight timers, small retention.
    ///
    /// The checkpoint interval stays long so tests drive checkpoints
    /// explicitly instead of racing a timer.
    pub fn for_testing(snapshot_dir: impl Into<PathBuf>) -> Self {
        TxManagerConfig {
            snapshot_dir: snapshot_dir.into(),
            tx_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_millis(20),
            snapshot_interval: Duration::from_secs(3600),
            snapshot_retain_count: 3,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Transaction timeout must be non-zero.
    #[error("transaction timeout must be non-zero")]
    ZeroTimeout,

    /// Background intervals must be non-zero.
    #[error("sweep and snapshot intervals must be non-zero")]
    ZeroInterval,

    /// At least one snapshot must be retained.
    #[error("snapshot retention count must be at least 1")]
    ZeroRetention,
}
