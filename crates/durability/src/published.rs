//! Read-only access to the latest durable snapshot.
//!
//! External consumers (store-side cleanup hooks running inside the storage
//! engine's process) poll the snapshot directory for the newest published
//! state. They never see live in-memory state and never mutate anything; a
//! slightly stale snapshot only delays cleanup, it never breaks correctness.

use crate::codec::CodecRegistry;
use crate::snapshot_types::TransactionSnapshot;
use crate::store::SnapshotStore;
use palisade_core::Result;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Polling cache over the newest durable snapshot.
///
/// `latest_state` re-reads the snapshot directory at most once per
/// `refresh_interval`; between refreshes it serves the cached capture.
pub struct StateCache {
    store: SnapshotStore,
    refresh_interval: Duration,
    cached: Mutex<CacheSlot>,
}

#[derive(Default)]
struct CacheSlot {
    fetched_at: Option<Instant>,
    snapshot: Option<Arc<TransactionSnapshot>>,
}

impl StateCache {
    /// Open a cache over `dir`, refreshing at most every `refresh_interval`.
    pub fn open(
        dir: impl Into<PathBuf>,
        codecs: CodecRegistry,
        refresh_interval: Duration,
    ) -> Result<Self> {
        Ok(StateCache {
            store: SnapshotStore::open(dir, codecs, usize::MAX)?,
            refresh_interval,
            cached: Mutex::new(CacheSlot::default()),
        })
    }

    /// The latest published snapshot, refreshing if the cache is stale.
    ///
    /// `None` until the manager has written its first snapshot. A failed
    /// refresh keeps serving the previous capture when one exists.
    pub fn latest_state(&self) -> Result<Option<Arc<TransactionSnapshot>>> {
        let mut slot = self.cached.lock();
        let stale = match slot.fetched_at {
            Some(at) => at.elapsed() >= self.refresh_interval,
            None => true,
        };
        if !stale {
            return Ok(slot.snapshot.clone());
        }

        match self.store.read_latest_snapshot() {
            Ok(snapshot) => {
                slot.fetched_at = Some(Instant::now());
                slot.snapshot = snapshot.map(Arc::new);
                debug!(
                    present = slot.snapshot.is_some(),
                    "Refreshed published transaction state"
                );
                Ok(slot.snapshot.clone())
            }
            Err(e) => {
                if let Some(previous) = slot.snapshot.clone() {
                    warn!(error = %e, "Refresh failed, serving previous published state");
                    Ok(Some(previous))
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Force a refresh regardless of the interval.
    pub fn refresh(&self) -> Result<Option<Arc<TransactionSnapshot>>> {
        {
            let mut slot = self.cached.lock();
            slot.fetched_at = None;
        }
        self.latest_state()
    }
}
