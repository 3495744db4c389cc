//! Database statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! let stats = db.stats().snapshot();
//! println!("inserts: {}", stats.inserts);
//! println!("cache hits: {}", stats.cache_hits);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Runtime counters.
///
/// All counters are atomic and can be read while operations are in progress.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    // Statement counters
    statements: AtomicU64,
    queries: AtomicU64,

    // Lifecycle counters
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    no_change_saves: AtomicU64,
    refusals: AtomicU64,
    failures: AtomicU64,
    reloads: AtomicU64,
    conflicts_resolved: AtomicU64,

    // Cache counters
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    generator_runs: AtomicU64,
    invalidations: AtomicU64,

    // Notification counters
    notifications: AtomicU64,
}

impl DatabaseStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_statement(&self) {
        self.statements.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_no_change(&self) {
        self.no_change_saves.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_refusal(&self) {
        self.refusals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reload(&self) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflicts_resolved(&self, count: u64) {
        self.conflicts_resolved.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_generator_run(&self) {
        self.generator_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invalidations(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_notification(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Write statements issued.
    pub fn statements(&self) -> u64 {
        self.statements.load(Ordering::Relaxed)
    }

    /// Read queries issued.
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Successful inserts.
    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Successful updates.
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// Successful deletes.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Saves that found nothing to write.
    pub fn no_change_saves(&self) -> u64 {
        self.no_change_saves.load(Ordering::Relaxed)
    }

    /// Saves or deletes vetoed by a hook.
    pub fn refusals(&self) -> u64 {
        self.refusals.load(Ordering::Relaxed)
    }

    /// Saves or deletes rejected by the statement channel.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Instances reloaded from their rows.
    pub fn reloads(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }

    /// Reload conflicts resolved by a model hook.
    pub fn conflicts_resolved(&self) -> u64 {
        self.conflicts_resolved.load(Ordering::Relaxed)
    }

    /// Cache lookups answered from a ready or in-flight entry.
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Cache lookups that had to generate a value.
    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    /// Generator invocations.
    pub fn generator_runs(&self) -> u64 {
        self.generator_runs.load(Ordering::Relaxed)
    }

    /// Cache entries dropped by invalidation.
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Change notifications delivered to the feed.
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            statements: self.statements(),
            queries: self.queries(),
            inserts: self.inserts(),
            updates: self.updates(),
            deletes: self.deletes(),
            no_change_saves: self.no_change_saves(),
            refusals: self.refusals(),
            failures: self.failures(),
            reloads: self.reloads(),
            conflicts_resolved: self.conflicts_resolved(),
            cache_hits: self.cache_hits(),
            cache_misses: self.cache_misses(),
            generator_runs: self.generator_runs(),
            invalidations: self.invalidations(),
            notifications: self.notifications(),
        }
    }
}

/// A point-in-time copy of [`DatabaseStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Write statements issued.
    pub statements: u64,
    /// Read queries issued.
    pub queries: u64,
    /// Successful inserts.
    pub inserts: u64,
    /// Successful updates.
    pub updates: u64,
    /// Successful deletes.
    pub deletes: u64,
    /// Saves that found nothing to write.
    pub no_change_saves: u64,
    /// Saves or deletes vetoed by a hook.
    pub refusals: u64,
    /// Saves or deletes rejected by the statement channel.
    pub failures: u64,
    /// Instances reloaded.
    pub reloads: u64,
    /// Conflicts resolved by a hook.
    pub conflicts_resolved: u64,
    /// Cache hits.
    pub cache_hits: u64,
    /// Cache misses.
    pub cache_misses: u64,
    /// Generator invocations.
    pub generator_runs: u64,
    /// Entries dropped by invalidation.
    pub invalidations: u64,
    /// Notifications delivered.
    pub notifications: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = DatabaseStats::new();
        stats.record_insert();
        stats.record_insert();
        stats.record_cache_hit();
        stats.record_invalidations(3);
        stats.record_conflicts_resolved(2);

        let snap = stats.snapshot();
        assert_eq!(snap.inserts, 2);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.invalidations, 3);
        assert_eq!(snap.conflicts_resolved, 2);
        assert_eq!(snap.deletes, 0);
    }
}
