//! Threaded stress harnesses for the partitioned store.

use crate::fixtures::{Pair, RouteByKey};
use conset_core::{PartitionedSet, SetError};
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for a stress run.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of writer threads.
    pub threads: usize,
    /// Width of the shared keyspace each thread writes.
    pub keys: u64,
    /// Transactions committed per thread.
    pub rounds: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            keys: 64,
            rounds: 16,
        }
    }
}

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressResult {
    /// Transactions committed across all threads.
    pub commits: usize,
    /// Wall-clock duration of the run.
    pub duration: Duration,
    /// Committed transactions per second.
    pub commits_per_second: f64,
}

impl StressResult {
    fn new(commits: usize, duration: Duration) -> Self {
        let commits_per_second = if duration.as_secs_f64() > 0.0 {
            commits as f64 / duration.as_secs_f64()
        } else {
            0.0
        };
        Self {
            commits,
            duration,
            commits_per_second,
        }
    }
}

/// Every thread repeatedly overwrites the whole keyspace with its own
/// thread id through reset/upsert/stage/commit cycles.
///
/// After the run, every key holds the value of whichever transaction
/// carried the highest generation in that key's partition. With a single
/// partition the generations are globally ordered, so one thread's final
/// round wins the entire keyspace.
pub fn overwrite_convergence<const P: usize>(
    set: &PartitionedSet<Pair, RouteByKey, P>,
    config: &StressConfig,
) -> StressResult {
    let started = Instant::now();
    let mut commits = 0;

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(config.threads);
        for thread_id in 0..config.threads {
            handles.push(scope.spawn(move || {
                let mut committed = 0;
                let mut txn = set.transaction().expect("transaction");
                for _ in 0..config.rounds {
                    txn.reset().expect("reset");
                    for key in 0..config.keys {
                        txn.upsert(Pair::new(key, thread_id as u64));
                    }
                    txn.stage().expect("stage");
                    txn.commit().expect("commit");
                    committed += 1;
                }
                committed
            }));
        }
        for handle in handles {
            commits += handle.join().expect("writer thread");
        }
    });

    StressResult::new(commits, started.elapsed())
}

/// Every thread commits its own disjoint slice of the keyspace, one
/// transaction per round, mirroring a bulk-load workload.
///
/// After the run every key of every slice must be present with its
/// owner's value.
pub fn disjoint_batches<const P: usize>(
    set: &PartitionedSet<Pair, RouteByKey, P>,
    config: &StressConfig,
) -> StressResult {
    let started = Instant::now();
    let mut commits = 0;

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(config.threads);
        for thread_id in 0..config.threads {
            handles.push(scope.spawn(move || {
                let offset = thread_id as u64 * config.keys;
                let mut committed = 0;
                let mut txn = set.transaction().expect("transaction");
                for _ in 0..config.rounds {
                    txn.reset().expect("reset");
                    for key in offset..offset + config.keys {
                        txn.upsert(Pair::new(key, thread_id as u64));
                    }
                    txn.stage().expect("stage");
                    txn.commit().expect("commit");
                    committed += 1;
                }
                committed
            }));
        }
        for handle in handles {
            commits += handle.join().expect("writer thread");
        }
    });

    StressResult::new(commits, started.elapsed())
}

/// Writers hammer watched single-key transactions against each other,
/// retrying on consistency failures, while readers sweep ranges.
///
/// Returns the number of committed transactions; the retried count is
/// folded into the duration. Exercises the watch-validate-retry loop
/// under real contention.
pub fn contended_watches<const P: usize>(
    set: &PartitionedSet<Pair, RouteByKey, P>,
    config: &StressConfig,
) -> StressResult {
    let started = Instant::now();
    let mut commits = 0;

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(config.threads);
        for thread_id in 0..config.threads {
            handles.push(scope.spawn(move || {
                let mut committed = 0;
                let mut txn = set.transaction().expect("transaction");
                for round in 0..config.rounds {
                    let key = (thread_id as u64 + round as u64) % config.keys;
                    loop {
                        txn.reset().expect("reset");
                        txn.watch(&key);
                        let seen = txn.find(&key, |pair| pair.value).unwrap_or(0);
                        txn.upsert(Pair::new(key, seen + 1));
                        match txn.stage() {
                            Ok(()) => {
                                txn.commit().expect("commit");
                                committed += 1;
                                break;
                            }
                            Err(SetError::Consistency | SetError::WouldBlock) => continue,
                            Err(error) => panic!("unexpected stage error: {error}"),
                        }
                    }
                }
                committed
            }));
        }
        for handle in handles {
            commits += handle.join().expect("writer thread");
        }
    });

    StressResult::new(commits, started.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::partitioned_with;

    #[test]
    fn convergence_on_one_partition_is_uniform() {
        let set = partitioned_with::<1>(&[]);
        let config = StressConfig {
            threads: 4,
            keys: 32,
            rounds: 8,
        };
        let result = overwrite_convergence(&set, &config);
        assert_eq!(result.commits, 32);

        let mut winners = Vec::new();
        for key in 0..config.keys {
            winners.push(set.find(&key, |entry| entry.element().value).unwrap());
        }
        let first = winners[0];
        assert!(winners.iter().all(|&value| value == first));
    }

    #[test]
    fn disjoint_batches_land_completely() {
        let set = partitioned_with::<4>(&[]);
        let config = StressConfig {
            threads: 4,
            keys: 32,
            rounds: 4,
        };
        disjoint_batches(&set, &config);

        assert_eq!(set.len().unwrap(), 4 * 32);
        for thread_id in 0..4u64 {
            for key in thread_id * 32..(thread_id + 1) * 32 {
                assert_eq!(set.find(&key, |entry| entry.element().value), Some(thread_id));
            }
        }
    }

    #[test]
    fn contended_watches_all_commit() {
        let set = partitioned_with::<4>(&[]);
        let config = StressConfig {
            threads: 4,
            keys: 8,
            rounds: 8,
        };
        let result = contended_watches(&set, &config);
        assert_eq!(result.commits, 4 * 8);
    }
}
