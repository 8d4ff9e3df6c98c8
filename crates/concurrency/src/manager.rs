//! The transaction manager service.
//!
//! `TransactionManager` serializes all state transitions behind one mutex.
//! Durable I/O never happens under that lock: each operation produces a
//! [`TransactionEdit`] and hands it to a dedicated writer thread over a
//! channel, while still holding the lock, so the log order is exactly the
//! apply order. Checkpoint requests travel on the same channel, which lines
//! the log rotation point up with the captured state.
//!
//! Two timer threads run alongside the writer: the expiration sweep moves
//! timed-out transactions to the invalid set, and the checkpoint loop
//! persists a full snapshot at the configured interval.

use crate::config::TxManagerConfig;
use crate::state::TransactionState;
use palisade_core::{now_millis, ChangeId, Error, Result, Transaction, TxId};
use palisade_durability::{CodecRegistry, SnapshotStore, TransactionEdit, TransactionSnapshot};
use parking_lot::{Condvar, Mutex};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

enum LogCommand {
    Edit(TransactionEdit),
    Checkpoint(TransactionSnapshot),
    Shutdown,
}

struct Inner {
    state: TransactionState,
    log_tx: Sender<LogCommand>,
}

impl Inner {
    /// Forward an edit to the writer thread. Called with the state lock
    /// held so the log order matches the apply order.
    fn log(&self, edit: TransactionEdit) -> Result<()> {
        self.log_tx
            .send(LogCommand::Edit(edit))
            .map_err(|_| Error::InvalidOperation("durability writer has stopped".to_string()))
    }
}

struct Lifecycle {
    shutdown: Mutex<bool>,
    signal: Condvar,
}

impl Lifecycle {
    /// Sleep for `period` or until shutdown. Returns whether to stop.
    fn wait(&self, period: Duration) -> bool {
        let mut down = self.shutdown.lock();
        if !*down {
            self.signal.wait_for(&mut down, period);
        }
        *down
    }
}

/// Single-authority transaction manager.
///
/// One instance owns a snapshot directory exclusively. All clients of the
/// same store must go through the same instance; its total order over
/// start/commit decisions is what makes snapshot isolation sound.
pub struct TransactionManager {
    inner: Arc<Mutex<Inner>>,
    lifecycle: Arc<Lifecycle>,
    config: TxManagerConfig,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl TransactionManager {
    /// Open a manager over `config.snapshot_dir`, recovering durable state.
    ///
    /// Recovery replays the newest decodable snapshot plus all subsequent
    /// edit logs; an empty directory starts fresh. The id allocator is
    /// floored at the highest recovered id so restarts never re-issue ids.
    pub fn open(config: TxManagerConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::InvalidOperation(e.to_string()))?;

        let store = SnapshotStore::open(
            &config.snapshot_dir,
            CodecRegistry::default(),
            config.snapshot_retain_count,
        )?;

        let state = match store.read_latest()? {
            Some(snapshot) => {
                info!(
                    last_id = %snapshot.last_transaction_id,
                    visibility = %snapshot.visibility_upper_bound,
                    in_progress = snapshot.in_progress.len(),
                    invalid = snapshot.invalid.len(),
                    "Recovered transaction state"
                );
                TransactionState::recovered(snapshot)
            }
            None => {
                info!(dir = %config.snapshot_dir.display(), "Starting with fresh transaction state");
                TransactionState::new()
            }
        };

        let (log_tx, log_rx) = mpsc::channel();
        let inner = Arc::new(Mutex::new(Inner { state, log_tx }));
        let lifecycle = Arc::new(Lifecycle {
            shutdown: Mutex::new(false),
            signal: Condvar::new(),
        });

        let mut threads = Vec::with_capacity(3);
        threads.push(
            thread::Builder::new()
                .name("tx-durability".to_string())
                .spawn(move || writer_loop(store, log_rx))?,
        );
        threads.push(spawn_sweep(
            Arc::clone(&inner),
            Arc::clone(&lifecycle),
            config.sweep_interval,
        )?);
        threads.push(spawn_checkpoint(
            Arc::clone(&inner),
            Arc::clone(&lifecycle),
            config.snapshot_interval,
        )?);

        Ok(TransactionManager {
            inner,
            lifecycle,
            config,
            threads: Mutex::new(threads),
        })
    }

    /// Start a transaction with the configured timeout.
    pub fn start(&self) -> Result<Transaction> {
        self.start_with_timeout(self.config.tx_timeout)
    }

    /// Start a transaction with an explicit timeout.
    pub fn start_with_timeout(&self, timeout: Duration) -> Result<Transaction> {
        let mut inner = self.inner.lock();
        let (tx, edit) = inner.state.start(timeout);
        inner.log(edit)?;
        debug!(id = %tx.id, visibility = %tx.visibility_upper_bound, "Transaction started");
        Ok(tx)
    }

    /// Start a transaction exempt from the expiration sweep.
    pub fn start_long_running(&self) -> Result<Transaction> {
        let mut inner = self.inner.lock();
        let (tx, edit) = inner.state.start_long_running();
        inner.log(edit)?;
        debug!(id = %tx.id, "Long-running transaction started");
        Ok(tx)
    }

    /// First commit phase: conflict-check `change_set` and record it.
    ///
    /// On [`Error::Conflict`] the transaction cannot ever commit; the caller
    /// must roll back its writes and call [`abort`](Self::abort).
    pub fn can_commit(
        &self,
        id: TxId,
        change_set: impl IntoIterator<Item = ChangeId>,
    ) -> Result<()> {
        let change_set = change_set.into_iter().collect();
        let mut inner = self.inner.lock();
        let edit = inner.state.can_commit(id, change_set)?;
        inner.log(edit)
    }

    /// Second commit phase: make the transaction's writes visible.
    pub fn commit(&self, id: TxId) -> Result<()> {
        let mut inner = self.inner.lock();
        let edit = inner.state.commit(id)?;
        inner.log(edit)?;
        debug!(id = %id, "Transaction committed");
        Ok(())
    }

    /// Abort a transaction whose writes have been rolled back.
    pub fn abort(&self, id: TxId) -> Result<()> {
        let mut inner = self.inner.lock();
        let edit = inner.state.abort(id)?;
        inner.log(edit)
    }

    /// Invalidate a transaction whose writes may persist in the store.
    pub fn invalidate(&self, id: TxId) -> Result<()> {
        let mut inner = self.inner.lock();
        let edit = inner.state.invalidate(id)?;
        inner.log(edit)?;
        warn!(id = %id, "Transaction invalidated");
        Ok(())
    }

    /// Drop invalid ids older than the oldest in-progress transaction.
    ///
    /// Maintenance operation, called once store-side cleanup has removed the
    /// data those transactions wrote. No-op when nothing is in progress.
    pub fn truncate_invalid(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let Some(bound) = inner.state.snapshot().in_progress.keys().next().copied() else {
            return Ok(());
        };
        let edit = inner.state.truncate_invalid(bound);
        inner.log(edit)?;
        info!(before = %bound, "Invalid set truncated");
        Ok(())
    }

    /// Point-in-time capture of the current state.
    pub fn current_snapshot(&self) -> TransactionSnapshot {
        self.inner.lock().state.capture()
    }

    /// Request a durable checkpoint of the current state.
    ///
    /// The write happens on the writer thread; [`close`](Self::close) waits
    /// for it.
    pub fn checkpoint_now(&self) -> Result<()> {
        let inner = self.inner.lock();
        let capture = inner.state.capture();
        inner
            .log_tx
            .send(LogCommand::Checkpoint(capture))
            .map_err(|_| Error::InvalidOperation("durability writer has stopped".to_string()))
    }

    /// Shut down: stop the timers, checkpoint once more, and wait for all
    /// pending durable writes to finish. Idempotent.
    pub fn close(&self) {
        {
            let mut down = self.lifecycle.shutdown.lock();
            if *down {
                return;
            }
            *down = true;
        }
        self.lifecycle.signal.notify_all();

        {
            let inner = self.inner.lock();
            let capture = inner.state.capture();
            let _ = inner.log_tx.send(LogCommand::Checkpoint(capture));
            let _ = inner.log_tx.send(LogCommand::Shutdown);
        }

        let mut threads = self.threads.lock();
        for handle in threads.drain(..) {
            if handle.join().is_err() {
                error!("Transaction manager thread panicked during shutdown");
            }
        }
        info!("Transaction manager stopped");
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        self.close();
    }
}

/// Owns the snapshot store and performs all durable I/O in channel order.
fn writer_loop(mut store: SnapshotStore, log_rx: Receiver<LogCommand>) {
    while let Ok(command) = log_rx.recv() {
        match command {
            LogCommand::Edit(edit) => {
                if let Err(e) = store.append_edit(&edit) {
                    error!(error = %e, "Failed to append transaction edit");
                }
            }
            LogCommand::Checkpoint(snapshot) => match store.write_snapshot(&snapshot) {
                Ok(info) => {
                    debug!(path = %info.path.display(), "Checkpoint written");
                }
                Err(e) => error!(error = %e, "Checkpoint failed"),
            },
            LogCommand::Shutdown => break,
        }
    }
}

fn spawn_sweep(
    inner: Arc<Mutex<Inner>>,
    lifecycle: Arc<Lifecycle>,
    interval: Duration,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("tx-sweep".to_string())
        .spawn(move || {
            while !lifecycle.wait(interval) {
                let now = now_millis();
                let mut inner = inner.lock();
                let expired = inner.state.expired(now);
                for id in expired {
                    match inner.state.invalidate(id) {
                        Ok(edit) => {
                            warn!(id = %id, "Invalidating timed-out transaction");
                            if inner.log(edit).is_err() {
                                return;
                            }
                        }
                        Err(e) => debug!(id = %id, error = %e, "Expired transaction already gone"),
                    }
                }
            }
        })?;
    Ok(handle)
}

fn spawn_checkpoint(
    inner: Arc<Mutex<Inner>>,
    lifecycle: Arc<Lifecycle>,
    interval: Duration,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("tx-checkpoint".to_string())
        .spawn(move || {
            while !lifecycle.wait(interval) {
                let inner = inner.lock();
                let capture = inner.state.capture();
                if inner.log_tx.send(LogCommand::Checkpoint(capture)).is_err() {
                    return;
                }
            }
        })?;
    Ok(handle)
}
