//! Hooks that record every call.

use livemodel_codec::Value;
use livemodel_core::{CoreError, CoreResult, Instance, Key, ModelHooks};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// One recorded hook call.
#[derive(Debug, Clone, PartialEq)]
pub enum HookEvent {
    /// `did_init`
    Init(Key),
    /// `should_insert`
    ShouldInsert(Key),
    /// `should_update`
    ShouldUpdate(Key),
    /// `should_delete`
    ShouldDelete(Key),
    /// `did_insert`
    Inserted(Key),
    /// `did_update`
    Updated(Key),
    /// `did_delete`
    Deleted(Key),
    /// `save_was_refused`
    Refused(Key),
    /// `save_did_fail`, with the error message.
    Failed(Key, String),
    /// `resolve_conflict`, with the field and the database value.
    Conflict(Key, String, Value),
}

impl HookEvent {
    /// The key of the instance the hook was called for.
    pub fn key(&self) -> &Key {
        match self {
            HookEvent::Init(k)
            | HookEvent::ShouldInsert(k)
            | HookEvent::ShouldUpdate(k)
            | HookEvent::ShouldDelete(k)
            | HookEvent::Inserted(k)
            | HookEvent::Updated(k)
            | HookEvent::Deleted(k)
            | HookEvent::Refused(k)
            | HookEvent::Failed(k, _)
            | HookEvent::Conflict(k, _, _) => k,
        }
    }
}

/// How [`RecordingHooks`] answers `resolve_conflict`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ConflictPolicy {
    /// Leave the conflict unresolved, which aborts the reload.
    #[default]
    Refuse,
    /// Keep the locally edited value.
    KeepLocal,
    /// Take the database value.
    TakeDatabase,
    /// Use this value.
    Value(Value),
}

/// Hooks that record every call and can be told to refuse.
///
/// # Example
///
/// ```rust
/// use livemodel_testkit::{HookEvent, RecordingHooks, TestDatabase, TestOptions, PERSON};
/// use std::sync::Arc;
///
/// let hooks = Arc::new(RecordingHooks::new());
/// let db = TestDatabase::memory_with(TestOptions::default().person_hooks(hooks.clone()));
///
/// let ann = db.instance_with_key(PERSON, 1, true).unwrap().unwrap();
/// hooks.refuse_inserts(true);
/// db.save(&ann).unwrap();
/// assert_eq!(hooks.count(|e| matches!(e, HookEvent::Refused(_))), 1);
/// ```
#[derive(Debug, Default)]
pub struct RecordingHooks {
    events: Mutex<Vec<HookEvent>>,
    refuse_inserts: AtomicBool,
    refuse_updates: AtomicBool,
    refuse_deletes: AtomicBool,
    conflicts: Mutex<ConflictPolicy>,
}

impl RecordingHooks {
    /// Creates hooks that approve everything and refuse conflicts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates hooks with the given conflict policy.
    pub fn with_conflict_policy(policy: ConflictPolicy) -> Self {
        let hooks = Self::default();
        hooks.set_conflict_policy(policy);
        hooks
    }

    /// Makes `should_insert` decline.
    pub fn refuse_inserts(&self, refuse: bool) {
        self.refuse_inserts.store(refuse, Ordering::SeqCst);
    }

    /// Makes `should_update` decline.
    pub fn refuse_updates(&self, refuse: bool) {
        self.refuse_updates.store(refuse, Ordering::SeqCst);
    }

    /// Makes `should_delete` decline.
    pub fn refuse_deletes(&self, refuse: bool) {
        self.refuse_deletes.store(refuse, Ordering::SeqCst);
    }

    /// Changes the conflict policy.
    pub fn set_conflict_policy(&self, policy: ConflictPolicy) {
        *self.conflicts.lock() = policy;
    }

    /// Every call so far, in order.
    pub fn events(&self) -> Vec<HookEvent> {
        self.events.lock().clone()
    }

    /// Number of calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&HookEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    /// Forgets recorded calls.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn record(&self, event: HookEvent) {
        self.events.lock().push(event);
    }
}

impl ModelHooks for RecordingHooks {
    fn did_init(&self, instance: &Instance) {
        self.record(HookEvent::Init(instance.key().clone()));
    }

    fn should_insert(&self, instance: &Instance) -> bool {
        self.record(HookEvent::ShouldInsert(instance.key().clone()));
        !self.refuse_inserts.load(Ordering::SeqCst)
    }

    fn should_update(&self, instance: &Instance) -> bool {
        self.record(HookEvent::ShouldUpdate(instance.key().clone()));
        !self.refuse_updates.load(Ordering::SeqCst)
    }

    fn should_delete(&self, instance: &Instance) -> bool {
        self.record(HookEvent::ShouldDelete(instance.key().clone()));
        !self.refuse_deletes.load(Ordering::SeqCst)
    }

    fn did_insert(&self, instance: &Instance) {
        self.record(HookEvent::Inserted(instance.key().clone()));
    }

    fn did_update(&self, instance: &Instance) {
        self.record(HookEvent::Updated(instance.key().clone()));
    }

    fn did_delete(&self, instance: &Instance) {
        self.record(HookEvent::Deleted(instance.key().clone()));
    }

    fn save_was_refused(&self, instance: &Instance) {
        self.record(HookEvent::Refused(instance.key().clone()));
    }

    fn save_did_fail(&self, instance: &Instance, error: &CoreError) {
        self.record(HookEvent::Failed(instance.key().clone(), error.to_string()));
    }

    fn resolve_conflict(
        &self,
        instance: &Instance,
        field: &str,
        database_value: &Value,
    ) -> CoreResult<Value> {
        self.record(HookEvent::Conflict(
            instance.key().clone(),
            field.to_string(),
            database_value.clone(),
        ));
        let policy = self.conflicts.lock().clone();
        match policy {
            ConflictPolicy::Refuse => Err(CoreError::UnresolvedConflict {
                model: instance.model_name().to_string(),
                key: instance.key().clone(),
                field: field.to_string(),
            }),
            ConflictPolicy::KeepLocal => instance.get(field),
            ConflictPolicy::TakeDatabase => Ok(database_value.clone()),
            ConflictPolicy::Value(value) => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{TestDatabase, TestOptions, PERSON};
    use std::sync::Arc;

    fn recorded() -> (TestDatabase, Arc<RecordingHooks>) {
        let hooks = Arc::new(RecordingHooks::new());
        let db = TestDatabase::memory_with(TestOptions::default().person_hooks(hooks.clone()));
        (db, hooks)
    }

    #[test]
    fn lifecycle_calls_are_recorded_in_order() {
        let (db, hooks) = recorded();
        let ann = db.instance_with_key(PERSON, 1, true).unwrap().unwrap();
        db.save(&ann).unwrap();
        ann.set("name", "Ann").unwrap();
        db.save(&ann).unwrap();
        db.delete(&ann).unwrap();

        let key = Key::Integer(1);
        assert_eq!(
            hooks.events(),
            vec![
                HookEvent::Init(key.clone()),
                HookEvent::ShouldInsert(key.clone()),
                HookEvent::Inserted(key.clone()),
                HookEvent::ShouldUpdate(key.clone()),
                HookEvent::Updated(key.clone()),
                HookEvent::ShouldDelete(key.clone()),
                HookEvent::Deleted(key),
            ]
        );
    }

    #[test]
    fn keep_local_policy_survives_reload() {
        let (db, hooks) = recorded();
        hooks.set_conflict_policy(ConflictPolicy::KeepLocal);
        db.insert_person(1, "a", None);

        let ann = db.instance_with_key(PERSON, 1, false).unwrap().unwrap();
        ann.set("name", "local").unwrap();
        db.external_write("UPDATE people SET name = 'remote' WHERE id = 1", &[]);
        db.data_was_updated_externally(&PERSON.into()).unwrap();

        assert_eq!(ann.get("name").unwrap(), Value::from("local"));
        assert_eq!(ann.persisted("name").unwrap(), Value::from("remote"));
        assert_eq!(hooks.count(|e| matches!(e, HookEvent::Conflict(..))), 1);
    }

    #[test]
    fn clear_forgets_events() {
        let (db, hooks) = recorded();
        let _ann = db.instance_with_key(PERSON, 1, true).unwrap().unwrap();
        let events = hooks.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key(), &Key::Integer(1));
        hooks.clear();
        assert!(hooks.events().is_empty());
    }
}
