//! Concurrent behavior of the partitioned store.

use conset_core::{PartitionConfig, PartitionedSet, SetError};
use conset_testkit::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

#[test]
fn upper_bound_survives_racing_erase() {
    // Key 30 stays put; key 20 flips in and out of its partition while a
    // reader keeps asking for the first key past 15. When the candidate
    // vanishes between the scan and the materialize step the lookup
    // restarts, so the reader must always land on 20 or 30, never on
    // nothing.
    let set = partitioned_with::<4>(&[(10, 1), (20, 2), (30, 3)]);
    let stop = AtomicBool::new(false);

    thread::scope(|scope| {
        let flipper = scope.spawn(|| {
            let mut txn = set.transaction().expect("transaction");
            while !stop.load(Ordering::Relaxed) {
                txn.reset().expect("reset");
                txn.erase(20);
                txn.stage().expect("stage");
                txn.commit().expect("commit");

                txn.reset().expect("reset");
                txn.upsert(Pair::new(20, 2));
                txn.stage().expect("stage");
                txn.commit().expect("commit");
            }
        });

        for _ in 0..500 {
            match set.upper_bound(&15, |entry| entry.key()) {
                Ok(Some(key)) => assert!(key == 20 || key == 30, "unexpected key {key}"),
                Ok(None) => panic!("keys 20/30 can never both be absent"),
                Err(SetError::WouldBlock) => {} // budget exhausted under contention; retry
                Err(error) => panic!("unexpected error: {error}"),
            }
        }
        stop.store(true, Ordering::Relaxed);
        flipper.join().expect("flipper thread");
    });
}

#[test]
fn single_partition_overwrites_converge_uniformly() {
    // One partition orders every transaction's generation globally, so
    // whichever round carries the newest generation wins the whole
    // keyspace: every key ends up with the same writer's value.
    let set = partitioned_with::<1>(&[]);
    let config = StressConfig {
        threads: 4,
        keys: 64,
        rounds: 16,
    };
    let result = overwrite_convergence(&set, &config);
    assert_eq!(result.commits, 4 * 16);
    assert_eq!(set.len().unwrap(), 64);

    let winner = set.find(&0, |entry| entry.element().value).unwrap();
    for key in 1..config.keys {
        assert_eq!(
            set.find(&key, |entry| entry.element().value),
            Some(winner),
            "key {key} disagrees with the winning writer"
        );
    }
}

#[test]
fn disjoint_transactional_writers_all_land() {
    let set = partitioned_with::<16>(&[]);
    let config = StressConfig {
        threads: 8,
        keys: 64,
        rounds: 4,
    };
    disjoint_batches(&set, &config);

    assert_eq!(set.len().unwrap(), 8 * 64);
    for thread_id in 0..8u64 {
        for key in thread_id * 64..(thread_id + 1) * 64 {
            assert_eq!(
                set.find(&key, |entry| entry.element().value),
                Some(thread_id)
            );
        }
    }
}

#[test]
fn watched_counters_never_lose_increments() {
    // Every committed transaction increments a watched counter; retries on
    // consistency failures mean no increment is lost, so the sum over all
    // keys equals the number of commits.
    let set = partitioned_with::<4>(&[]);
    let config = StressConfig {
        threads: 4,
        keys: 8,
        rounds: 16,
    };
    let result = contended_watches(&set, &config);
    assert_eq!(result.commits, 4 * 16);

    let mut total = 0;
    for key in 0..config.keys {
        total += set.find(&key, |entry| entry.element().value).unwrap_or(0);
    }
    assert_eq!(total, 4 * 16);
}

#[test]
fn concurrent_readers_and_writers_make_progress() {
    let set = partitioned_with::<4>(&(0..64).map(|k| (k, k)).collect::<Vec<_>>());
    let stop = AtomicBool::new(false);

    thread::scope(|scope| {
        let writer = scope.spawn(|| {
            let mut round = 0u64;
            while !stop.load(Ordering::Relaxed) {
                set.upsert(Pair::new(round % 64, round)).expect("upsert");
                round += 1;
            }
        });

        let sweeper = scope.spawn(|| {
            while !stop.load(Ordering::Relaxed) {
                let mut count = 0;
                set.range(&0, &64, |_| {
                    count += 1;
                    Ok(())
                })
                .expect("range");
                assert_eq!(count, 64);
            }
        });

        for _ in 0..200 {
            assert!(set.find(&1, |entry| entry.element().key).is_some());
            assert!(set.len().unwrap() == 64);
        }
        stop.store(true, Ordering::Relaxed);
        writer.join().expect("writer");
        sweeper.join().expect("sweeper");
    });
}

#[test]
fn tiny_budgets_surface_would_block() {
    let config = PartitionConfig::new().max_lock_passes(1).max_restarts(1);
    let set: PartitionedSet<Pair, RouteByKey, 4> = PartitionedSet::with_config(config);
    for key in 0..4 {
        set.upsert(Pair::new(key, key)).unwrap();
    }

    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let (held_tx, held_rx) = std::sync::mpsc::channel::<()>();

    thread::scope(|scope| {
        // A mutating sweep whose callback parks on its first entry keeps
        // that entry's partition write-locked until released.
        let set = &set;
        let sweeper = scope.spawn(move || {
            let mut release = Some(release_rx);
            set.range_mut(&0, &4, |_| {
                if let Some(rx) = release.take() {
                    held_tx.send(()).expect("signal held");
                    rx.recv().expect("await release");
                }
                Ok(())
            })
            .expect("range_mut");
        });

        held_rx.recv().expect("await sweeper");

        // One pass over the partitions cannot succeed while the sweeper
        // holds a write lock.
        assert_eq!(set.len(), Err(SetError::WouldBlock));

        release_tx.send(()).expect("release sweeper");
        sweeper.join().expect("sweeper thread");
    });

    // With the lock released the same budget suffices.
    assert_eq!(set.len().unwrap(), 4);
}
