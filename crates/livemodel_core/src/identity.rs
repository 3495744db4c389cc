//! The identity map: at most one live instance per model and key.
//!
//! Entries are weak. The map never keeps an instance alive; when the last
//! handle to an instance is dropped the instance removes its own entry, and
//! any entry found dead during a lookup is pruned on the spot.
//!
//! Strong handles are never dropped while the map's lock is held: every
//! method that may end up discarding an instance releases the lock first.
//! An instance's drop also only `try_lock`s the map, so a release racing a
//! lookup on another thread leaves a dead entry behind instead of blocking.

use crate::error::{CoreError, CoreResult};
use crate::instance::{Instance, InstanceInner};
use crate::types::Key;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

type Slots = HashMap<String, HashMap<Key, Weak<InstanceInner>>>;

/// Shared state, referenced weakly by every instance.
#[derive(Default)]
pub(crate) struct IdentityShared {
    slots: Mutex<Slots>,
}

impl IdentityShared {
    /// Called from an instance's drop.
    pub(crate) fn release(&self, model: &str, key: &Key, ptr: *const InstanceInner) {
        // Busy: leave the dead entry for the next lookup to prune.
        let Some(mut slots) = self.slots.try_lock() else {
            return;
        };
        if let Some(entries) = slots.get_mut(model) {
            if entries.get(key).is_some_and(|w| std::ptr::eq(w.as_ptr(), ptr)) {
                entries.remove(key);
            }
        }
    }
}

/// Registry of live instances keyed by (model, primary key).
pub(crate) struct IdentityMap {
    shared: Arc<IdentityShared>,
}

impl IdentityMap {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(IdentityShared::default()),
        }
    }

    /// Weak handle given to new instances.
    pub(crate) fn handle(&self) -> Weak<IdentityShared> {
        Arc::downgrade(&self.shared)
    }

    /// The live instance for `key`, if any.
    pub(crate) fn find(&self, model: &str, key: &Key) -> Option<Instance> {
        let mut slots = self.shared.slots.lock();
        let entries = slots.get_mut(model)?;
        match entries.get(key).map(Weak::upgrade) {
            Some(Some(inner)) => Some(Instance::from_inner(inner)),
            Some(None) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Returns true if a live instance is registered for `key`.
    pub(crate) fn contains(&self, model: &str, key: &Key) -> bool {
        self.shared
            .slots
            .lock()
            .get(model)
            .and_then(|entries| entries.get(key))
            .is_some_and(|w| w.strong_count() > 0)
    }

    /// Registers an instance that must not be substituted.
    ///
    /// Fails with [`CoreError::DuplicateKey`] if a different live instance
    /// already holds the key. Re-registering the same instance is a no-op.
    /// The caller keeps ownership, so a rejected instance is dropped outside
    /// the lock.
    pub(crate) fn register(&self, instance: &Instance) -> CoreResult<()> {
        let mut slots = self.shared.slots.lock();
        let entries = slots.entry(instance.model_name().to_string()).or_default();
        if let Some(existing) = entries.get(instance.key()) {
            if existing.strong_count() > 0 && !std::ptr::eq(existing.as_ptr(), instance.as_ptr()) {
                return Err(CoreError::DuplicateKey {
                    model: instance.model_name().to_string(),
                    key: instance.key().clone(),
                });
            }
        }
        entries.insert(instance.key().clone(), instance.downgrade());
        Ok(())
    }

    /// Registers `candidate` unless another live instance holds its key.
    ///
    /// Returns the registered instance and whether it is `candidate`.
    pub(crate) fn get_or_register(&self, candidate: Instance) -> (Instance, bool) {
        let mut slots = self.shared.slots.lock();
        let entries = slots.entry(candidate.model_name().to_string()).or_default();
        let winner = entries.get(candidate.key()).and_then(Weak::upgrade);
        if winner.is_none() {
            entries.insert(candidate.key().clone(), candidate.downgrade());
        }
        drop(slots);
        match winner {
            // `candidate` drops here, after the lock is released.
            Some(inner) => (Instance::from_inner(inner), false),
            None => (candidate, true),
        }
    }

    /// Removes `instance`'s entry, if it is still the registered one.
    pub(crate) fn unregister(&self, instance: &Instance) {
        let mut slots = self.shared.slots.lock();
        if let Some(entries) = slots.get_mut(instance.model_name()) {
            if entries
                .get(instance.key())
                .is_some_and(|w| std::ptr::eq(w.as_ptr(), instance.as_ptr()))
            {
                entries.remove(instance.key());
            }
        }
    }

    /// Snapshot of the live instances of one model.
    ///
    /// The snapshot may be stale as soon as it is returned: other threads
    /// can register or release instances concurrently.
    pub(crate) fn all_live(&self, model: &str) -> Vec<Instance> {
        let mut slots = self.shared.slots.lock();
        let Some(entries) = slots.get_mut(model) else {
            return Vec::new();
        };
        entries.retain(|_, w| w.strong_count() > 0);
        let mut live: Vec<Instance> = entries
            .values()
            .filter_map(Weak::upgrade)
            .map(Instance::from_inner)
            .collect();
        drop(slots);
        live.sort_by(|a, b| a.key().cmp(b.key()));
        live
    }

    /// Number of live instances across all models.
    pub(crate) fn live_count(&self) -> usize {
        self.shared
            .slots
            .lock()
            .values()
            .flat_map(HashMap::values)
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Forgets every entry. Instances stay valid but are no longer tracked.
    pub(crate) fn clear(&self) {
        self.shared.slots.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{people_db, PEOPLE};
    use crate::types::Key;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn lookups_return_the_same_object() {
        let db = people_db();
        let a = db.instance_with_key(PEOPLE, 1, true).unwrap().unwrap();
        let b = db.instance_with_key(PEOPLE, 1, true).unwrap().unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(db.identity.live_count(), 1);
    }

    #[test]
    fn dropped_instances_leave_the_map() {
        let db = people_db();
        let a = db.instance_with_key(PEOPLE, 1, true).unwrap().unwrap();
        assert!(db.identity.contains(PEOPLE, &Key::Integer(1)));
        drop(a);
        assert!(!db.identity.contains(PEOPLE, &Key::Integer(1)));
        assert_eq!(db.identity.live_count(), 0);
        assert!(db.identity.find(PEOPLE, &Key::Integer(1)).is_none());
    }

    fn impostor_for(db: &crate::Database, real: &crate::Instance) -> crate::Instance {
        let model = db.models.get(PEOPLE).unwrap();
        crate::Instance::new(
            Arc::clone(&model),
            Arc::clone(real.schema()),
            real.key().clone(),
            crate::instance::InstanceData::fresh(real.schema(), real.key()),
            db.identity.handle(),
        )
    }

    #[test]
    fn register_rejects_a_second_live_instance() {
        let db = people_db();
        let a = db.instance_with_key(PEOPLE, 1, true).unwrap().unwrap();
        db.identity.register(&a).unwrap();

        let impostor = impostor_for(&db, &a);
        assert!(matches!(
            db.identity.register(&impostor),
            Err(crate::CoreError::DuplicateKey { .. })
        ));

        // the impostor's drop must not evict the real entry
        drop(impostor);
        assert!(db.identity.find(PEOPLE, &Key::Integer(1)).unwrap().ptr_eq(&a));
    }

    #[test]
    fn losing_candidates_drop_without_the_lock() {
        let db = people_db();
        let a = db.instance_with_key(PEOPLE, 1, true).unwrap().unwrap();

        // The loser is dropped inside the call; the winner's entry stays.
        let (winner, fresh) = db.identity.get_or_register(impostor_for(&db, &a));
        assert!(!fresh);
        assert!(winner.ptr_eq(&a));
        assert_eq!(db.identity.live_count(), 1);

        drop(winner);
        drop(a);
        assert!(!db.identity.contains(PEOPLE, &Key::Integer(1)));
        assert_eq!(db.identity.all_live(PEOPLE).len(), 0);
    }

    #[test]
    fn unregister_only_removes_the_matching_instance() {
        let db = people_db();
        let a = db.instance_with_key(PEOPLE, 1, true).unwrap().unwrap();
        db.identity.unregister(&a);
        assert!(db.identity.find(PEOPLE, &Key::Integer(1)).is_none());

        let b = db.instance_with_key(PEOPLE, 1, true).unwrap().unwrap();
        assert!(!a.ptr_eq(&b));
        db.identity.unregister(&a);
        assert!(db.identity.find(PEOPLE, &Key::Integer(1)).unwrap().ptr_eq(&b));
    }

    #[test]
    fn concurrent_lookups_yield_one_instance() {
        let db = Arc::new(people_db());
        db.execute_update_query(None, "INSERT INTO people (id, name) VALUES (7, 'x')", &[], false)
            .unwrap();

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let db = Arc::clone(&db);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    db.instance_with_key(PEOPLE, 7, false).unwrap().unwrap()
                })
            })
            .collect();

        let found: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(found.iter().all(|i| i.ptr_eq(&found[0])));
        assert_eq!(db.identity.live_count(), 1);
    }

    #[test]
    fn all_live_is_sorted_by_key() {
        let db = people_db();
        let keep: Vec<_> = [3, 1, 2]
            .into_iter()
            .map(|k| db.instance_with_key(PEOPLE, k, true).unwrap().unwrap())
            .collect();
        let keys: Vec<Key> = db
            .identity
            .all_live(PEOPLE)
            .iter()
            .map(|i| i.key().clone())
            .collect();
        assert_eq!(keys, vec![Key::Integer(1), Key::Integer(2), Key::Integer(3)]);
        drop(keep);
    }
}
