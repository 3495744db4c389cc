//! Notification batching.
//!
//! A [`Batch`] is an explicit context: operations performed through it have
//! their notifications coalesced, operations performed directly on the
//! [`Database`] (from this or any other thread) are delivered immediately.
//! `Batch` is not `Sync` and is only ever handed out by reference, so a
//! batch never spans threads.

use super::change::ChangeKind;
use crate::database::Database;
use crate::error::CoreResult;
use crate::instance::Instance;
use crate::types::{Key, ModelScope, ReloadOutcome, SaveResult};
use livemodel_codec::Value;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Where lifecycle notifications go.
pub(crate) enum Delivery<'a> {
    /// Straight to the change feed.
    Immediate,
    /// Into an open batch.
    Batched(&'a RefCell<PendingNotifications>),
}

struct PendingEntry {
    model: String,
    kind: ChangeKind,
    instances: Vec<Instance>,
    seen: HashSet<Instance>,
    changed_fields: BTreeSet<String>,
}

/// Coalesced notifications, one entry per (model, kind) in first-occurrence
/// order.
#[derive(Default)]
pub(crate) struct PendingNotifications {
    entries: Vec<PendingEntry>,
    index: HashMap<(String, ChangeKind), usize>,
}

impl PendingNotifications {
    pub(crate) fn add(
        &mut self,
        model: &str,
        kind: ChangeKind,
        instances: &[Instance],
        changed_fields: &BTreeSet<String>,
    ) {
        let slot = *self
            .index
            .entry((model.to_string(), kind))
            .or_insert_with(|| {
                self.entries.push(PendingEntry {
                    model: model.to_string(),
                    kind,
                    instances: Vec::new(),
                    seen: HashSet::new(),
                    changed_fields: BTreeSet::new(),
                });
                self.entries.len() - 1
            });
        let entry = &mut self.entries[slot];
        for instance in instances {
            if entry.seen.insert(instance.clone()) {
                entry.instances.push(instance.clone());
            }
        }
        entry.changed_fields.extend(changed_fields.iter().cloned());
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn into_notifications(
        self,
    ) -> impl Iterator<Item = (String, ChangeKind, Vec<Instance>, BTreeSet<String>)> {
        self.entries
            .into_iter()
            .map(|e| (e.model, e.kind, e.instances, e.changed_fields))
    }
}

/// An open notification batch.
///
/// Obtained from [`Database::with_batched_notifications`]. Mutating
/// operations issued through the batch behave exactly like their
/// [`Database`] counterparts, except that their notifications are held and
/// merged until the batch ends. Cache invalidation still happens at write
/// time.
///
/// # Example
///
/// ```rust,ignore
/// db.with_batched_notifications(true, |batch| {
///     for person in &people {
///         person.set("visits", 0)?;
///         batch.save(person)?;
///     }
///     Ok::<_, CoreError>(())
/// })?;
/// // one Update notification carrying every saved person
/// ```
pub struct Batch<'db> {
    db: &'db Database,
    pending: RefCell<PendingNotifications>,
}

impl<'db> Batch<'db> {
    pub(crate) fn new(db: &'db Database) -> Self {
        Self {
            db,
            pending: RefCell::new(PendingNotifications::default()),
        }
    }

    fn delivery(&self) -> Delivery<'_> {
        Delivery::Batched(&self.pending)
    }

    pub(crate) fn into_pending(self) -> PendingNotifications {
        self.pending.into_inner()
    }

    /// The database this batch belongs to.
    pub fn database(&self) -> &'db Database {
        self.db
    }

    /// Number of distinct (model, kind) notifications held so far.
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Opens a nested batch. Nested batches are part of this one: the
    /// `deliver` flag is ignored and nothing is delivered until the
    /// outermost batch ends.
    pub fn with_batched_notifications<R>(
        &self,
        deliver: bool,
        f: impl FnOnce(&Batch<'db>) -> R,
    ) -> R {
        debug!(deliver, "nested notification batch");
        f(self)
    }

    /// Saves an instance. See [`Database::save`].
    ///
    /// # Errors
    ///
    /// Same as [`Database::save`].
    pub fn save(&self, instance: &Instance) -> CoreResult<SaveResult> {
        self.db.save_in(instance, &self.delivery())
    }

    /// Deletes an instance. See [`Database::delete`].
    ///
    /// # Errors
    ///
    /// Same as [`Database::delete`].
    pub fn delete(&self, instance: &Instance) -> CoreResult<SaveResult> {
        self.db.delete_in(instance, &self.delivery())
    }

    /// Reloads an instance. See [`Database::reload`].
    ///
    /// # Errors
    ///
    /// Same as [`Database::reload`].
    pub fn reload(&self, instance: &Instance) -> CoreResult<ReloadOutcome> {
        self.db.reload_in(instance, &self.delivery())
    }

    /// Saves every unsaved instance in scope. See [`Database::save_all`].
    ///
    /// # Errors
    ///
    /// Same as [`Database::save_all`].
    pub fn save_all(&self, scope: &ModelScope) -> CoreResult<usize> {
        self.db.save_all_in(scope, &self.delivery())
    }

    /// See [`Database::data_was_updated_externally`].
    ///
    /// # Errors
    ///
    /// Same as [`Database::data_was_updated_externally`].
    pub fn data_was_updated_externally(&self, scope: &ModelScope) -> CoreResult<()> {
        self.db.data_was_updated_externally_in(scope, &self.delivery())
    }

    /// See [`Database::execute_update_query`].
    ///
    /// # Errors
    ///
    /// Same as [`Database::execute_update_query`].
    pub fn execute_update_query(
        &self,
        model: Option<&str>,
        sql: &str,
        args: &[Value],
        notify: bool,
    ) -> CoreResult<u64> {
        self.db
            .execute_update_query_in(model, sql, args, notify, &self.delivery())
    }

    /// Looks up an instance. See [`Database::instance_with_key`].
    ///
    /// # Errors
    ///
    /// Same as [`Database::instance_with_key`].
    pub fn instance_with_key(
        &self,
        model: &str,
        key: impl Into<Key>,
        create: bool,
    ) -> CoreResult<Option<Instance>> {
        self.db.instance_with_key(model, key, create)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{people_db, PEOPLE};

    #[test]
    fn pending_entries_deduplicate_in_first_occurrence_order() {
        let db = people_db();
        let p = db.instance_with_key(PEOPLE, 1, true).unwrap().unwrap();
        let q = db.instance_with_key(PEOPLE, 2, true).unwrap().unwrap();

        let mut pending = PendingNotifications::default();
        let name: BTreeSet<String> = ["name".to_string()].into();
        let age: BTreeSet<String> = ["age".to_string()].into();
        pending.add(PEOPLE, ChangeKind::Update, &[q.clone()], &name);
        pending.add(PEOPLE, ChangeKind::Insert, &[p.clone()], &name);
        pending.add(PEOPLE, ChangeKind::Update, &[p.clone(), q.clone()], &age);
        assert_eq!(pending.len(), 2);

        let out: Vec<_> = pending.into_notifications().collect();
        assert_eq!(out[0].1, ChangeKind::Update);
        assert_eq!(out[0].2, vec![q.clone(), p.clone()]);
        assert_eq!(out[0].3.len(), 2);
        assert_eq!(out[1].1, ChangeKind::Insert);
        assert_eq!(out[1].2, vec![p]);
    }

    #[test]
    fn nested_batches_deliver_with_the_outermost() {
        let db = people_db();
        let rx = db.subscribe_to(PEOPLE);
        let p = db.instance_with_key(PEOPLE, 1, true).unwrap().unwrap();
        let q = db.instance_with_key(PEOPLE, 2, true).unwrap().unwrap();

        db.with_batched_notifications(true, |outer| {
            outer.save(&p).unwrap();
            outer.with_batched_notifications(false, |inner| {
                inner.save(&q).unwrap();
                assert_eq!(inner.pending_count(), 2);
            });
            assert!(rx.try_recv().is_err());
            assert_eq!(outer.pending_count(), 2);
        });

        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].kind, ChangeKind::Insert);
        assert_eq!(got[0].instances, vec![p.clone(), q.clone()]);
        assert_eq!(got[1].kind, ChangeKind::AnyChange);
        assert_eq!(got[1].instances, vec![p, q]);
    }

    #[test]
    fn nested_delivery_waits_for_a_discarding_outer_batch() {
        let db = people_db();
        let rx = db.subscribe();
        let p = db.instance_with_key(PEOPLE, 1, true).unwrap().unwrap();

        db.with_batched_notifications(false, |outer| {
            outer.with_batched_notifications(true, |inner| {
                inner.save(&p).unwrap();
            });
        });
        assert!(rx.try_recv().is_err());
        assert!(!p.has_unsaved_changes());
    }
}
