//! Transaction lifecycle under snapshot isolation.

use palisade::{ChangeId, Error, TransactionManager, TxManagerConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn manager_in(dir: &TempDir) -> TransactionManager {
    crate::init_logging();
    TransactionManager::open(TxManagerConfig::for_testing(dir.path())).unwrap()
}

fn changes(names: &[&str]) -> Vec<ChangeId> {
    names.iter().map(|n| ChangeId::from(*n)).collect()
}

#[test]
fn concurrent_writers_on_same_change_conflict() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);

    // A and B run concurrently and both write change K.
    let a = manager.start().unwrap();
    let b = manager.start().unwrap();

    manager.can_commit(a.id, changes(&["K"])).unwrap();
    manager.commit(a.id).unwrap();

    let err = manager.can_commit(b.id, changes(&["K"])).unwrap_err();
    match err {
        Error::Conflict { conflicting, .. } => assert_eq!(conflicting, a.id),
        other => panic!("expected conflict, got {other}"),
    }
    manager.abort(b.id).unwrap();

    // A retry of B's work starts after A's commit and succeeds.
    let retry = manager.start().unwrap();
    assert!(retry.is_visible(a.id));
    manager.can_commit(retry.id, changes(&["K"])).unwrap();
    manager.commit(retry.id).unwrap();
}

#[test]
fn readers_never_see_in_flight_writes() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);

    let writer = manager.start().unwrap();
    let reader = manager.start().unwrap();
    assert!(!reader.is_visible(writer.id));

    manager.can_commit(writer.id, changes(&["K"])).unwrap();
    manager.commit(writer.id).unwrap();

    // The running reader keeps its capture; only new readers see the commit.
    assert!(!reader.is_visible(writer.id));
    manager.commit(reader.id).unwrap();

    let later = manager.start().unwrap();
    assert!(later.is_visible(writer.id));
    manager.commit(later.id).unwrap();
}

#[test]
fn transaction_reads_its_own_writes() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);
    let tx = manager.start().unwrap();
    assert!(tx.is_visible(tx.id));
}

#[test]
fn visibility_bound_never_decreases() {
    let dir = TempDir::new().unwrap();
    let manager = manager_in(&dir);

    let mut last_bound = manager.current_snapshot().visibility_upper_bound;
    let mut open = Vec::new();
    for round in 0..50u32 {
        let tx = manager.start().unwrap();
        if round % 3 == 0 {
            open.push(tx.id);
        } else {
            manager
                .can_commit(tx.id, changes(&[&format!("k{round}")]))
                .unwrap();
            manager.commit(tx.id).unwrap();
        }
        if round % 7 == 0 {
            if let Some(id) = open.pop() {
                manager.abort(id).unwrap();
            }
        }
        let bound = manager.current_snapshot().visibility_upper_bound;
        assert!(bound >= last_bound);
        last_bound = bound;
    }
}

#[test]
fn contended_commits_have_exactly_one_winner_per_round() {
    let dir = TempDir::new().unwrap();
    let manager = Arc::new(manager_in(&dir));
    const THREADS: usize = 8;
    const ROUNDS: usize = 10;

    let commits = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let commits = Arc::clone(&commits);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                for round in 0..ROUNDS {
                    barrier.wait();
                    // Everyone starts before anyone commits this round.
                    let tx = manager.start().unwrap();
                    barrier.wait();
                    let key = format!("contended-{round}");
                    match manager.can_commit(tx.id, [ChangeId::from(key.as_str())]) {
                        Ok(()) => match manager.commit(tx.id) {
                            Ok(()) => {
                                commits.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(_) => manager.abort(tx.id).unwrap(),
                        },
                        Err(_) => manager.abort(tx.id).unwrap(),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // All threads started before any committed, so per round exactly one
    // writer of the contended change can win.
    assert_eq!(commits.load(Ordering::SeqCst), ROUNDS as u64);
    assert!(manager.current_snapshot().in_progress.is_empty());
}

#[test]
fn disjoint_writers_all_commit() {
    let dir = TempDir::new().unwrap();
    let manager = Arc::new(manager_in(&dir));

    let handles: Vec<_> = (0..8)
        .map(|thread_id: usize| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                for i in 0..20 {
                    let tx = manager.start().unwrap();
                    let key = format!("t{thread_id}-k{i}");
                    manager
                        .can_commit(tx.id, [ChangeId::from(key.as_str())])
                        .unwrap();
                    manager.commit(tx.id).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let snap = manager.current_snapshot();
    assert!(snap.in_progress.is_empty());
    assert!(snap.invalid.is_empty());
}
