//! Durable state across restarts and simulated crashes.

use palisade::{
    ChangeId, CodecRegistry, SnapshotStore, TransactionEdit, TransactionManager,
    TransactionSnapshot, TxId, TxManagerConfig, MAX_TX_PER_MS,
};
use std::collections::BTreeSet;
use tempfile::TempDir;

fn changes(names: &[&str]) -> Vec<ChangeId> {
    names.iter().map(|n| ChangeId::from(*n)).collect()
}

fn config_in(dir: &TempDir) -> TxManagerConfig {
    crate::init_logging();
    TxManagerConfig::for_testing(dir.path())
}

#[test]
fn committed_and_invalid_state_survive_restart() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let (committed, invalidated) = {
        let manager = TransactionManager::open(config.clone()).unwrap();
        let good = manager.start().unwrap();
        manager.can_commit(good.id, changes(&["K"])).unwrap();
        manager.commit(good.id).unwrap();

        let bad = manager.start().unwrap();
        manager.invalidate(bad.id).unwrap();
        manager.close();
        (good.id, bad.id)
    };

    let manager = TransactionManager::open(config).unwrap();
    let snap = manager.current_snapshot();
    assert!(snap.is_visible(committed));
    assert!(!snap.is_visible(invalidated));
    assert_eq!(snap.invalid, vec![invalidated]);
}

#[test]
fn ids_stay_unique_across_many_restarts() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let mut seen = Vec::new();
    for _ in 0..5 {
        let manager = TransactionManager::open(config.clone()).unwrap();
        for _ in 0..10 {
            let tx = manager.start().unwrap();
            manager.commit(tx.id).unwrap();
            seen.push(tx.id);
        }
        manager.close();
    }

    let mut sorted = seen.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), seen.len());
    // Issue order is allocation order.
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn manager_recovers_from_snapshot_plus_edits() {
    let dir = TempDir::new().unwrap();

    // A previous incarnation checkpointed with three transactions in flight,
    // logged their commits, then died without a final checkpoint.
    let base_millis = 1_700_000_000_000u64;
    let id = |seq: u64| TxId::from_parts(base_millis, seq);

    let mut base = TransactionSnapshot::empty(base_millis);
    let mut edits = Vec::new();
    for seq in 0..3 {
        base.apply_edit(&TransactionEdit::Started {
            id: id(seq),
            expiration_millis: u64::MAX,
            visibility_upper_bound: TxId::ZERO,
        });
        edits.push(TransactionEdit::Committed {
            id: id(seq),
            change_set: [ChangeId::from(format!("k{seq}").as_str())]
                .into_iter()
                .collect::<BTreeSet<_>>(),
        });
    }

    {
        let mut store =
            SnapshotStore::open(dir.path(), CodecRegistry::default(), 10).unwrap();
        store.write_snapshot(&base).unwrap();
        for edit in &edits {
            store.append_edit(edit).unwrap();
        }
    }

    let manager =
        TransactionManager::open(config_in(&dir)).unwrap();
    let snap = manager.current_snapshot();

    let mut expected = base;
    for edit in &edits {
        expected.apply_edit(edit);
    }
    assert_eq!(snap.visibility_upper_bound, expected.visibility_upper_bound);
    assert_eq!(snap.in_progress, expected.in_progress);
    for seq in 0..3 {
        assert!(snap.is_visible(id(seq)));
    }

    // New ids land above everything recovered.
    let next = manager.start().unwrap();
    assert!(next.id > id(2));
    assert!(next.id.as_u64() >= base_millis * MAX_TX_PER_MS);
}

#[test]
fn manager_recovers_from_edits_without_any_snapshot() {
    let dir = TempDir::new().unwrap();

    // A previous incarnation died before its first checkpoint: the directory
    // holds only edit logs.
    let base_millis = 1_700_000_000_000u64;
    let id = |seq: u64| TxId::from_parts(base_millis, seq);

    {
        let mut store =
            SnapshotStore::open(dir.path(), CodecRegistry::default(), 10).unwrap();
        for seq in 0..3 {
            store
                .append_edit(&TransactionEdit::Started {
                    id: id(seq),
                    expiration_millis: u64::MAX,
                    visibility_upper_bound: TxId::ZERO,
                })
                .unwrap();
            store
                .append_edit(&TransactionEdit::Committed {
                    id: id(seq),
                    change_set: [ChangeId::from(format!("k{seq}").as_str())]
                        .into_iter()
                        .collect::<BTreeSet<_>>(),
                })
                .unwrap();
        }
    }

    let manager = TransactionManager::open(config_in(&dir)).unwrap();
    let snap = manager.current_snapshot();
    for seq in 0..3 {
        assert!(snap.is_visible(id(seq)));
    }
    assert!(snap.in_progress.is_empty());
    assert!(manager.start().unwrap().id > id(2));
}

#[test]
fn recovery_tolerates_corrupt_newest_snapshot() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let committed = {
        let manager = TransactionManager::open(config.clone()).unwrap();
        let tx = manager.start().unwrap();
        manager.can_commit(tx.id, changes(&["K"])).unwrap();
        manager.commit(tx.id).unwrap();
        manager.checkpoint_now().unwrap();
        manager.close();
        tx.id
    };

    // Flip a byte in the newest snapshot; the fact still survives through an
    // older snapshot or the replayed edit logs.
    let store = SnapshotStore::open(dir.path(), CodecRegistry::default(), 10).unwrap();
    let newest = store.list_snapshots().unwrap().remove(0);
    let mut data = std::fs::read(&newest.path).unwrap();
    let mid = data.len() / 2;
    data[mid] ^= 0xff;
    std::fs::write(&newest.path, &data).unwrap();

    let manager = TransactionManager::open(config).unwrap();
    assert!(manager.current_snapshot().is_visible(committed));
}
