//! Cross-crate scenarios: persistence, subtypes, closing and the cache
//! maintenance entry points.

use livemodel_codec::{FieldInfo, Value};
use livemodel_core::{
    ChangeKind, Config, CoreError, EntityState, Key, ModelHooks, ModelScope, SaveResult,
    MAX_KEY_GENERATION_ATTEMPTS,
};
use livemodel_testkit::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Tags(Vec<&'static str>);

impl From<Tags> for Value {
    fn from(tags: Tags) -> Self {
        Value::Array(tags.0.into_iter().map(Value::from).collect())
    }
}

#[test]
fn structured_fields_survive_reopen() {
    let db = TestDatabase::file();
    let pet = db.new_instance(PET).unwrap();
    let key = pet.key().clone();
    pet.set("name", "Rex").unwrap();
    pet.set("owner_id", 1).unwrap();
    pet.set("vaccinated", true).unwrap();
    pet.set("tags", Tags(vec!["good", "loud"])).unwrap();
    assert_eq!(db.save(&pet).unwrap(), SaveResult::Succeeded);
    drop(pet);

    let db = db.reopen();
    let pet = db.instance_with_key(PET, key, false).unwrap().unwrap();
    assert_eq!(pet.state(), EntityState::Clean);
    assert_eq!(pet.get("vaccinated").unwrap(), Value::Bool(true));
    assert_eq!(pet.get("tags").unwrap(), Value::from(Tags(vec!["good", "loud"])));
}

#[test]
fn parent_scopes_include_subtypes() {
    let db = TestDatabase::memory();
    let person = db.instance_with_key(PERSON, 1, true).unwrap().unwrap();
    let employee = db.instance_with_key(EMPLOYEE, 1, true).unwrap().unwrap();
    let pet = db.new_instance(PET).unwrap();
    pet.set("name", "Rex").unwrap();
    assert!(!person.ptr_eq(&employee));

    let loaded = db.all_loaded_instances(&ModelScope::model(PERSON)).unwrap();
    assert_eq!(loaded.len(), 2);

    assert_eq!(db.save_all(&ModelScope::model(PERSON)).unwrap(), 2);
    assert_eq!(pet.state(), EntityState::New);
    assert_eq!(db.save_all(&ModelScope::All).unwrap(), 1);
    assert_eq!(pet.state(), EntityState::Clean);
}

#[test]
fn clearing_a_parent_scope_clears_subtype_entries() {
    let db = TestDatabase::memory();
    db.cached_instances_where(PERSON, "1 = 1", &[], &[]).unwrap();
    db.cached_instances_where(EMPLOYEE, "1 = 1", &[], &[]).unwrap();
    db.cached_instances_where(PET, "1 = 1", &[], &[]).unwrap();
    assert_eq!(db.cached_entry_count(), 3);

    db.clear_cached_data(&ModelScope::model(PERSON)).unwrap();
    assert_eq!(db.cached_entry_count(), 1);

    db.handle_low_memory_warning();
    assert_eq!(db.cached_entry_count(), 0);
}

#[test]
fn disabled_cache_runs_every_time() {
    let db = TestDatabase::memory_with(
        TestOptions::default().config(Config::new().query_cache_enabled(false)),
    );
    let runs = AtomicUsize::new(0);
    for _ in 0..3 {
        let value = db
            .cached_object("answer", &[PERSON], &[], || {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(42u32)
            })
            .unwrap()
            .unwrap();
        assert_eq!(*value, 42);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(db.cached_entry_count(), 0);
}

#[test]
fn cached_objects_keep_their_type() {
    let db = TestDatabase::memory();
    db.cached_object("answer", &[PERSON], &[], || Ok(42u32)).unwrap();
    let err = db
        .cached_object("answer", &[PERSON], &[], || Ok(String::new()))
        .unwrap_err();
    assert!(matches!(err, CoreError::CacheTypeMismatch { .. }));
}

#[test]
fn failed_generations_are_retried() {
    let db = TestDatabase::memory();
    let first = db.cached_object::<u32, _>("flaky", &[PERSON], &[], || {
        Err(CoreError::invalid_operation("not yet"))
    });
    assert!(first.is_err());

    let second = db.cached_object("flaky", &[PERSON], &[], || Ok(7u32)).unwrap();
    assert_eq!(second.as_deref(), Some(&7));
}

#[test]
fn key_lists_keep_their_order() {
    let db = TestDatabase::memory();
    db.populate_people(5);
    let live = db.instance_with_key(PERSON, 4, false).unwrap().unwrap();

    let keys: Vec<Key> = [4, 9, 2, 4, 1].into_iter().map(Key::Integer).collect();
    let found = db.instances_with_primary_key_values(PERSON, &keys).unwrap();
    let found_keys: Vec<_> = found.iter().map(|p| p.key().clone()).collect();

    assert_eq!(found_keys, vec![Key::Integer(4), Key::Integer(2), Key::Integer(1)]);
    assert!(found[0].ptr_eq(&live));
}

#[test]
fn raw_queries_expand_placeholders() {
    let db = TestDatabase::memory();
    db.populate_people(3);

    let names = db
        .first_column_from_query(Some(PERSON), "SELECT name FROM $T ORDER BY $PK DESC", &[])
        .unwrap();
    assert_eq!(names[0], Value::from("person 3"));

    let oldest = db
        .first_value_from_query(Some(PERSON), "SELECT MAX(age) FROM $T", &[])
        .unwrap();
    assert_eq!(oldest, Some(Value::Integer(23)));

    let rows = db
        .result_rows_from_query(None, "SELECT id, name FROM people WHERE id = ?", &[2.into()])
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.row(0).unwrap().get("name"), Some(&Value::from("person 2")));
}

struct StuckGenerator;

impl ModelHooks for StuckGenerator {
    fn primary_key_for_new_instance(&self, _field: &FieldInfo) -> Key {
        Key::from("taken")
    }
}

#[test]
fn a_stuck_key_generator_gives_up() {
    let db = TestDatabase::memory_with(TestOptions::default().pet_hooks(Arc::new(StuckGenerator)));
    db.external_write("INSERT INTO pets (id, name) VALUES ('taken', 'Old')", &[]);
    db.channel.reset();

    let err = db.new_instance(PET).unwrap_err();
    assert!(matches!(
        err,
        CoreError::GenerationExhausted { attempts, .. } if attempts == MAX_KEY_GENERATION_ATTEMPTS
    ));
    assert!(err.is_fatal());
    assert_eq!(db.channel.query_count(), MAX_KEY_GENERATION_ATTEMPTS as u64);
}

#[test]
fn closing_orphans_live_instances() {
    let db = TestDatabase::memory();
    db.insert_person(1, "Ann", None);
    let ann = db.instance_with_key(PERSON, 1, false).unwrap().unwrap();

    let err = db.close().unwrap_err();
    assert!(matches!(err, CoreError::OrphanedInstances { count: 1 }));
    assert!(!err.is_fatal());
    assert!(!db.is_open());

    // Reads degrade, writes fail.
    assert!(db.instance_with_key(PERSON, 1, false).unwrap().is_none());
    assert!(db.all_instances(PERSON).unwrap().is_empty());
    assert!(db.cached_instances_where(PERSON, "1 = 1", &[], &[]).unwrap().is_empty());
    ann.set("name", "Zed").unwrap();
    assert!(matches!(db.save(&ann).unwrap_err(), CoreError::DatabaseClosed));
}

#[test]
fn external_writes_without_notify_only_invalidate() {
    let db = TestDatabase::memory();
    db.insert_person(1, "Ann", Some(30));
    let ann = db.instance_with_key(PERSON, 1, false).unwrap().unwrap();
    let updates = db.subscribe();
    db.cached_instances_where(PERSON, "1 = 1", &[], &[]).unwrap();

    db.execute_update_query(None, "UPDATE people SET age = 99", &[], false)
        .unwrap();

    assert_eq!(db.cached_entry_count(), 0);
    assert_eq!(ann.get("age").unwrap(), Value::Integer(30));
    assert!(updates.try_recv().is_err());

    db.data_was_updated_externally(&ModelScope::All).unwrap();
    assert_eq!(ann.get("age").unwrap(), Value::Integer(99));
    let kinds: Vec<_> = updates.try_iter().map(|n| (n.model, n.kind)).collect();
    assert!(kinds.contains(&(PERSON.to_string(), ChangeKind::ExternalChange)));
}
