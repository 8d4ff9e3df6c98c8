//! Store-side cleanup consuming published transaction state.
//!
//! The cleanup consumer runs in the storage engine's process: it polls the
//! snapshot directory through `StateCache`, builds a `PublishedState` with
//! its own column family policies, and classifies stored versions.

use palisade::{
    ChangeId, CodecRegistry, FamilyPolicy, PublishedState, SnapshotStore, StateCache,
    TransactionManager, TransactionSnapshot, TxId, TxManagerConfig, VersionAction,
    MAX_TX_PER_MS,
};
use std::collections::HashMap;
use std::time::Duration;
use tempfile::TempDir;

const HOUR_MS: u64 = 60 * 60 * 1000;

#[test]
fn cleanup_drops_expired_and_invalidated_versions() {
    crate::init_logging();
    let dir = TempDir::new().unwrap();

    // Eight writers an hour apart; the manager died before V8 resolved, and
    // V3, V5, V7 were invalidated.
    let base = 1_700_000_000_000u64;
    let v: Vec<TxId> = (0..9)
        .map(|i| TxId::from_raw((base + i * HOUR_MS) * MAX_TX_PER_MS))
        .collect();

    let mut snap = TransactionSnapshot::empty(base + 8 * HOUR_MS);
    snap.last_transaction_id = v[8];
    snap.visibility_upper_bound = v[6];
    snap.invalid = vec![v[3], v[5], v[7]];
    {
        let mut store = SnapshotStore::open(dir.path(), CodecRegistry::default(), 10).unwrap();
        store.write_snapshot(&snap).unwrap();
    }

    let cache = StateCache::open(
        dir.path(),
        CodecRegistry::default(),
        Duration::from_secs(60),
    )
    .unwrap();
    let published = cache.latest_state().unwrap().unwrap();

    let families = HashMap::from([(
        "data".to_string(),
        FamilyPolicy {
            ttl_millis: Some(3 * HOUR_MS),
            retain_latest_only: false,
        },
    )]);
    let state = PublishedState::from_snapshot(&published, families);

    // Older than the 3h TTL against the visibility bound's implied time.
    assert_eq!(state.classify("data", v[1]), VersionAction::DropExpired);
    assert_eq!(state.classify("data", v[2]), VersionAction::DropExpired);
    // Invalidated writers are dropped regardless of age.
    assert_eq!(state.classify("data", v[3]), VersionAction::DropInvalid);
    assert_eq!(state.classify("data", v[5]), VersionAction::DropInvalid);
    assert_eq!(state.classify("data", v[7]), VersionAction::DropInvalid);
    // Visible and fresh.
    assert_eq!(state.classify("data", v[4]), VersionAction::Keep);
    assert_eq!(state.classify("data", v[6]), VersionAction::Keep);
    // Above the bound: still in flight, not cleanup's call.
    assert_eq!(state.classify("data", v[8]), VersionAction::Keep);

    let column: Vec<TxId> = v[1..=8].iter().rev().copied().collect();
    assert_eq!(state.filter_column("data", &column), vec![v[8], v[6], v[4]]);
}

#[test]
fn cache_observes_manager_checkpoints() {
    crate::init_logging();
    let dir = TempDir::new().unwrap();
    let manager = TransactionManager::open(TxManagerConfig::for_testing(dir.path())).unwrap();

    let tx = manager.start().unwrap();
    manager
        .can_commit(tx.id, [ChangeId::from("row")])
        .unwrap();
    manager.commit(tx.id).unwrap();

    let bad = manager.start().unwrap();
    manager.invalidate(bad.id).unwrap();

    manager.checkpoint_now().unwrap();

    let cache = StateCache::open(
        dir.path(),
        CodecRegistry::default(),
        Duration::from_millis(1),
    )
    .unwrap();

    // The checkpoint write is asynchronous; poll like a real consumer would.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let published = loop {
        if let Some(snapshot) = cache.latest_state().unwrap() {
            break snapshot;
        }
        assert!(std::time::Instant::now() < deadline, "checkpoint never appeared");
        std::thread::sleep(Duration::from_millis(10));
    };

    assert!(published.is_visible(tx.id));
    assert!(!published.is_visible(bad.id));

    let state = PublishedState::from_snapshot(&published, HashMap::new());
    assert_eq!(state.classify("any", tx.id), VersionAction::Keep);
    assert_eq!(state.classify("any", bad.id), VersionAction::DropInvalid);
}
