//! Query cache with single-flight generation and table-write invalidation.
//!
//! Entries are created lazily by the first caller that misses. Concurrent
//! callers for the same key wait for that first caller's result instead of
//! generating their own. An entry is dropped when one of its owning models
//! is written, unless every field the write touched is in the entry's
//! ignore-set. Dropped entries are regenerated on the next access.

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::instance::Instance;
use crate::stats::DatabaseStats;
use crate::types::{AffectedFields, ModelScope};
use livemodel_codec::Value;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace, warn};

type Shared = Arc<dyn Any + Send + Sync>;

/// Identifies a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A cached filtered instance query.
    Instances {
        /// Model queried.
        model: String,
        /// Filter clause, before placeholder expansion.
        filter: String,
        /// Statement arguments.
        args: Vec<Value>,
    },
    /// A cached computed object.
    Object {
        /// Caller-chosen identifier.
        identifier: String,
    },
}

enum SlotState {
    Pending,
    Ready(Shared),
    Failed(Arc<CoreError>),
}

struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn pending() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            ready: Condvar::new(),
        }
    }

    fn fill(&self, state: SlotState) {
        *self.state.lock() = state;
        self.ready.notify_all();
    }

    fn wait(&self) -> CoreResult<Shared> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                SlotState::Pending => self.ready.wait(&mut state),
                SlotState::Ready(value) => return Ok(Arc::clone(value)),
                SlotState::Failed(err) => {
                    return Err(CoreError::CacheGeneration {
                        source: Arc::clone(err),
                    })
                }
            }
        }
    }
}

struct Entry {
    owners: BTreeSet<String>,
    ignored: BTreeSet<String>,
    slot: Arc<Slot>,
}

/// The cache itself. Values are type-erased; typed access is provided by
/// the [`Database`] entry points.
pub(crate) struct QueryCache {
    entries: Mutex<HashMap<CacheKey, Entry>>,
}

// Marks the slot failed if the generator unwinds.
struct LeaderGuard<'a> {
    cache: &'a QueryCache,
    key: &'a CacheKey,
    slot: &'a Arc<Slot>,
    armed: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.slot
                .fill(SlotState::Failed(Arc::new(CoreError::CacheGeneratorPanicked)));
            self.cache.remove_slot(self.key, self.slot);
        }
    }
}

impl QueryCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the value for `key`, generating it if absent.
    ///
    /// At most one generator runs per key at a time; concurrent callers wait
    /// and receive the same value or the same failure. A failed generation
    /// leaves no entry behind, so the next call retries.
    pub(crate) fn get_or_generate(
        &self,
        key: CacheKey,
        owners: BTreeSet<String>,
        ignored: BTreeSet<String>,
        stats: &DatabaseStats,
        generate: impl FnOnce() -> CoreResult<Shared>,
    ) -> CoreResult<Shared> {
        let (slot, leader) = {
            let mut entries = self.entries.lock();
            match entries.get(&key) {
                Some(entry) => (Arc::clone(&entry.slot), false),
                None => {
                    let slot = Arc::new(Slot::pending());
                    entries.insert(
                        key.clone(),
                        Entry {
                            owners,
                            ignored,
                            slot: Arc::clone(&slot),
                        },
                    );
                    (slot, true)
                }
            }
        };

        if !leader {
            stats.record_cache_hit();
            trace!(?key, "cache hit");
            return slot.wait();
        }

        stats.record_cache_miss();
        stats.record_generator_run();
        trace!(?key, "cache miss, generating");

        let mut guard = LeaderGuard {
            cache: self,
            key: &key,
            slot: &slot,
            armed: true,
        };
        let result = generate();
        guard.armed = false;
        drop(guard);

        match result {
            Ok(value) => {
                slot.fill(SlotState::Ready(Arc::clone(&value)));
                Ok(value)
            }
            Err(err) => {
                let err = Arc::new(err);
                slot.fill(SlotState::Failed(Arc::clone(&err)));
                self.remove_slot(&key, &slot);
                debug!(?key, error = %err, "cache generation failed");
                Err(CoreError::CacheGeneration { source: err })
            }
        }
    }

    /// Removes the entry for `key` if it still holds `slot`.
    fn remove_slot(&self, key: &CacheKey, slot: &Arc<Slot>) {
        let removed = {
            let mut entries = self.entries.lock();
            match entries.get(key) {
                Some(entry) if Arc::ptr_eq(&entry.slot, slot) => entries.remove(key),
                _ => None,
            }
        };
        drop(removed);
    }

    /// Drops entries owned by `model`, except those whose ignore-set covers
    /// every affected field. Returns the number of entries dropped.
    pub(crate) fn invalidate(&self, model: &str, affected: &AffectedFields) -> usize {
        self.remove_where(|entry| {
            entry.owners.contains(model) && !affected.is_subset_of(&entry.ignored)
        })
    }

    /// Drops every entry owned by `model`.
    pub(crate) fn clear_model(&self, model: &str) -> usize {
        self.remove_where(|entry| entry.owners.contains(model))
    }

    /// Drops every entry.
    pub(crate) fn clear_all(&self) -> usize {
        let drained: Vec<Entry> = {
            let mut entries = self.entries.lock();
            entries.drain().map(|(_, e)| e).collect()
        };
        drained.len()
    }

    /// Number of entries, including in-flight generations.
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    // Removed values may hold instances; they are dropped after the lock
    // is released.
    fn remove_where(&self, mut predicate: impl FnMut(&Entry) -> bool) -> usize {
        let removed: Vec<Entry> = {
            let mut entries = self.entries.lock();
            let keys: Vec<CacheKey> = entries
                .iter()
                .filter(|(_, e)| predicate(e))
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| entries.remove(k)).collect()
        };
        removed.len()
    }
}

fn name_set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| (*s).to_string()).collect()
}

impl Database {
    /// Like [`Database::instances_where`], memoized.
    ///
    /// The result is cached until `model` is written. Writes that only touch
    /// fields listed in `ignored_fields` keep the cached result.
    ///
    /// Returns an empty list when the database is closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails. Callers waiting on the same
    /// in-flight query receive [`CoreError::CacheGeneration`].
    pub fn cached_instances_where(
        &self,
        model: &str,
        filter: &str,
        args: &[Value],
        ignored_fields: &[&str],
    ) -> CoreResult<Vec<Instance>> {
        if !self.is_open() {
            warn!(model, "cached query on closed database");
            return Ok(Vec::new());
        }
        if !self.config.query_cache_enabled {
            return self.instances_where(model, filter, args);
        }

        let key = CacheKey::Instances {
            model: model.to_string(),
            filter: filter.to_string(),
            args: args.to_vec(),
        };
        let value = self.cache.get_or_generate(
            key,
            name_set(&[model]),
            name_set(ignored_fields),
            &self.stats,
            || {
                let found = self.instances_where(model, filter, args)?;
                Ok(Arc::new(found) as Shared)
            },
        )?;

        value
            .downcast_ref::<Vec<Instance>>()
            .cloned()
            .ok_or_else(|| CoreError::CacheTypeMismatch {
                identifier: format!("{model} where {filter}"),
            })
    }

    /// Returns a cached value, calling `generator` on a miss.
    ///
    /// The value is cached until one of the `owners` models is written.
    /// Writes that only touch fields listed in `ignored_fields` keep it.
    /// Concurrent misses on the same identifier run `generator` once; the
    /// other callers wait and share the result. A generator must not request
    /// its own identifier.
    ///
    /// Returns `Ok(None)` when the database is closed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CacheGeneration`] if the generator failed and
    /// [`CoreError::CacheTypeMismatch`] if the identifier is cached with a
    /// different type.
    pub fn cached_object<T, F>(
        &self,
        identifier: &str,
        owners: &[&str],
        ignored_fields: &[&str],
        generator: F,
    ) -> CoreResult<Option<Arc<T>>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> CoreResult<T>,
    {
        if !self.is_open() {
            warn!(identifier, "cached object requested on closed database");
            return Ok(None);
        }
        if !self.config.query_cache_enabled {
            return generator().map(|v| Some(Arc::new(v)));
        }

        let value = self.cache.get_or_generate(
            CacheKey::Object {
                identifier: identifier.to_string(),
            },
            name_set(owners),
            name_set(ignored_fields),
            &self.stats,
            || Ok(Arc::new(generator()?) as Shared),
        )?;

        value
            .downcast::<T>()
            .map(Some)
            .map_err(|_| CoreError::CacheTypeMismatch {
                identifier: identifier.to_string(),
            })
    }

    /// Drops cached data for the models in scope.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownModel`] for an unknown scope.
    pub fn clear_cached_data(&self, scope: &ModelScope) -> CoreResult<()> {
        let dropped = match scope {
            ModelScope::All => self.cache.clear_all(),
            ModelScope::Model(_) => self
                .models
                .resolve(scope)?
                .iter()
                .map(|m| self.cache.clear_model(&m.name))
                .sum(),
        };
        self.stats.record_invalidations(dropped as u64);
        debug!(?scope, dropped, "cached data cleared");
        Ok(())
    }

    /// Drops every cache entry. Call when the process is low on memory.
    pub fn handle_low_memory_warning(&self) {
        let dropped = self.cache.clear_all();
        self.stats.record_invalidations(dropped as u64);
        debug!(dropped, "low memory: query cache cleared");
    }

    /// Number of cache entries, including in-flight generations.
    pub fn cached_entry_count(&self) -> usize {
        self.cache.len()
    }

    /// Invalidates after a write.
    pub(crate) fn invalidate_cache(&self, model: &str, affected: &AffectedFields) {
        let dropped = self.cache.invalidate(model, affected);
        if dropped > 0 {
            self.stats.record_invalidations(dropped as u64);
            trace!(model, dropped, "cache entries invalidated");
        }
    }
}
