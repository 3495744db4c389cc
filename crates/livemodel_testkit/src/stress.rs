//! Stress runs for livemodel.
//!
//! These drive the identity map, the lifecycle and the query cache from
//! several threads at once and report throughput.

use crate::fixtures::PERSON;
use livemodel_core::{Database, Key, SaveResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Operations per run, split across threads.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Number of distinct `person` keys touched.
    pub key_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 4_000,
            threads: 4,
            key_count: 64,
        }
    }
}

fn key_for(i: usize, config: &StressConfig) -> Key {
    Key::Integer((i % config.key_count.max(1)) as i64 + 1)
}

fn run_threads<F>(config: &StressConfig, op: F) -> StressTestResult
where
    F: Fn(usize) -> bool + Send + Sync + 'static,
{
    let op = Arc::new(op);
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let threads = config.threads.max(1);
    let ops_per_thread = config.operations / threads;

    let start = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let op = Arc::clone(&op);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    if op(t * ops_per_thread + i) {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        if handle.join().is_err() {
            failed.fetch_add(ops_per_thread, Ordering::Relaxed);
        }
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Looks up `person` keys from every thread.
///
/// An operation fails if the lookup errors, or if two lookups of one key
/// return different objects while the first is still held.
pub fn stress_identity_lookups(db: Arc<Database>, config: &StressConfig) -> StressTestResult {
    let cfg = config.clone();
    run_threads(config, move |i| {
        let key = key_for(i, &cfg);
        let first = db.instance_with_key(PERSON, key.clone(), true);
        let second = db.instance_with_key(PERSON, key, true);
        match (first, second) {
            (Ok(Some(a)), Ok(Some(b))) => a.ptr_eq(&b),
            _ => false,
        }
    })
}

/// Edits and saves `person` instances from every thread.
///
/// Threads share instances through the identity map, so concurrent saves of
/// one key race on the same object. Rows should exist beforehand: two
/// threads inserting the same new instance collide on the primary key. A
/// save counts as successful unless it errors or the channel rejects it.
pub fn stress_concurrent_saves(db: Arc<Database>, config: &StressConfig) -> StressTestResult {
    let cfg = config.clone();
    run_threads(config, move |i| {
        let Ok(Some(person)) = db.instance_with_key(PERSON, key_for(i, &cfg), true) else {
            return false;
        };
        if person.set("age", (i % 100) as i64).is_err() {
            return false;
        }
        matches!(
            db.save(&person),
            Ok(SaveResult::Succeeded | SaveResult::NoChanges)
        )
    })
}

/// Mixes cached queries with writes that invalidate them.
///
/// One operation in `write_every` saves an ignored field (`last_seen`),
/// which must not invalidate; one in `write_every * 4` saves `age`, which
/// must.
pub fn stress_cached_queries(
    db: Arc<Database>,
    config: &StressConfig,
    write_every: usize,
) -> StressTestResult {
    let cfg = config.clone();
    let write_every = write_every.max(1);
    run_threads(config, move |i| {
        if i % (write_every * 4) == 0 {
            let Ok(Some(person)) = db.instance_with_key(PERSON, key_for(i, &cfg), true) else {
                return false;
            };
            return person.set("age", (i % 90) as i64).is_ok() && db.save(&person).is_ok();
        }
        if i % write_every == 0 {
            let Ok(Some(person)) = db.instance_with_key(PERSON, key_for(i, &cfg), true) else {
                return false;
            };
            return person.set("last_seen", i as i64).is_ok() && db.save(&person).is_ok();
        }
        db.cached_instances_where(PERSON, "age >= ?", &[30.into()], &["last_seen"])
            .is_ok()
    })
}
