//! Behavioral guarantees of the runtime, exercised end to end over SQLite.

use livemodel_codec::Value;
use livemodel_core::{ChangeKind, CoreError, EntityState, ReloadOutcome, SaveResult};
use livemodel_testkit::prelude::*;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

// ============================================================================
// Identity
// ============================================================================

#[test]
fn concurrent_lookups_yield_one_instance() {
    init_test_logging();
    let db = TestDatabase::memory();
    db.insert_person(7, "Gus", Some(40));

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let db = Arc::clone(&db.db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                db.instance_with_key(PERSON, 7, false).unwrap().unwrap()
            })
        })
        .collect();

    let found: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(found.iter().all(|p| p.ptr_eq(&found[0])));

    let again = db.instance_with_key(PERSON, 7, false).unwrap().unwrap();
    assert!(again.ptr_eq(&found[0]));
}

#[test]
fn concurrent_creation_yields_one_instance() {
    let db = TestDatabase::memory();
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let db = Arc::clone(&db.db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                db.instance_with_key(PERSON, 99, true).unwrap().unwrap()
            })
        })
        .collect();

    let found: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(found.iter().all(|p| p.ptr_eq(&found[0])));
    assert_eq!(found[0].state(), EntityState::New);
}

#[test]
fn released_instances_are_loaded_again() {
    let hooks = Arc::new(RecordingHooks::new());
    let db = TestDatabase::memory_with(TestOptions::default().person_hooks(hooks.clone()));
    db.insert_person(1, "Ann", None);

    drop(db.instance_with_key(PERSON, 1, false).unwrap());
    let _again = db.instance_with_key(PERSON, 1, false).unwrap().unwrap();
    assert_eq!(hooks.count(|e| matches!(e, HookEvent::Init(_))), 2);
}

// ============================================================================
// Save
// ============================================================================

#[test]
fn second_save_does_no_io() {
    let db = TestDatabase::memory();
    let ann = db.instance_with_key(PERSON, 1, true).unwrap().unwrap();
    ann.set("name", "Ann").unwrap();

    assert_eq!(db.save(&ann).unwrap(), SaveResult::Succeeded);
    assert_eq!(ann.state(), EntityState::Clean);
    let statements = db.channel.statement_count();

    assert_eq!(db.save(&ann).unwrap(), SaveResult::NoChanges);
    assert_eq!(db.channel.statement_count(), statements);
}

#[test]
fn failed_save_keeps_the_instance_unchanged() {
    let hooks = Arc::new(RecordingHooks::new());
    let db = TestDatabase::memory_with(TestOptions::default().person_hooks(hooks.clone()));
    db.insert_person(1, "Ann", Some(30));
    let ann = db.instance_with_key(PERSON, 1, false).unwrap().unwrap();
    ann.set("age", 31).unwrap();

    db.channel.fail_next_executes(1);
    assert_eq!(db.save(&ann).unwrap(), SaveResult::Failed);
    assert_eq!(ann.state(), EntityState::Dirty);
    assert_eq!(ann.persisted("age").unwrap(), Value::Integer(30));
    assert!(ann.last_error().is_some());
    assert_eq!(hooks.count(|e| matches!(e, HookEvent::Failed(..))), 1);

    // Retry after inspecting the error.
    assert_eq!(db.save(&ann).unwrap(), SaveResult::Succeeded);
    assert!(ann.last_error().is_none());
}

#[test]
fn refused_delete_keeps_the_row() {
    let hooks = Arc::new(RecordingHooks::new());
    let db = TestDatabase::memory_with(TestOptions::default().person_hooks(hooks.clone()));
    db.insert_person(1, "Ann", None);
    let ann = db.instance_with_key(PERSON, 1, false).unwrap().unwrap();

    hooks.refuse_deletes(true);
    assert_eq!(db.delete(&ann).unwrap(), SaveResult::Refused);
    assert!(!ann.is_deleted());
    assert_eq!(db.number_of_instances(PERSON).unwrap(), 1);
}

#[test]
fn deleted_instances_cannot_be_saved() {
    let db = TestDatabase::memory();
    db.insert_person(1, "Ann", None);
    let ann = db.instance_with_key(PERSON, 1, false).unwrap().unwrap();
    assert_eq!(db.delete(&ann).unwrap(), SaveResult::Succeeded);

    let err = db.save(&ann).unwrap_err();
    assert!(matches!(err, CoreError::InvalidOperation { .. }));
    assert!(err.is_fatal());
    assert!(db.instance_with_key(PERSON, 1, false).unwrap().is_none());
}

// ============================================================================
// Revert
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn revert_restores_persisted_values(edits in person_edits_strategy(10)) {
        let db = TestDatabase::memory();
        db.insert_person(1, "Ann", Some(30));
        let ann = db.instance_with_key(PERSON, 1, false).unwrap().unwrap();

        for edit in &edits {
            edit.apply(&ann).unwrap();
        }
        ann.revert_unsaved_changes();

        prop_assert!(ann.changed_field_names().is_empty());
        prop_assert_eq!(ann.state(), EntityState::Clean);
        for (field, value) in ann.all_fields() {
            prop_assert_eq!(value, ann.persisted(&field).unwrap());
        }
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

fn edited_then_overwritten(db: &TestDatabase) -> livemodel_core::Instance {
    db.insert_person(1, "b", None);
    let person = db.instance_with_key(PERSON, 1, false).unwrap().unwrap();
    person.set("name", "a").unwrap();
    db.external_write("UPDATE people SET name = 'c' WHERE id = 1", &[]);
    person
}

#[test]
fn reload_asks_the_conflict_hook() {
    let hooks = Arc::new(RecordingHooks::with_conflict_policy(ConflictPolicy::Value(
        Value::from("merged"),
    )));
    let db = TestDatabase::memory_with(TestOptions::default().person_hooks(hooks.clone()));
    let person = edited_then_overwritten(&db);

    assert_eq!(db.reload(&person).unwrap(), ReloadOutcome::Reloaded);

    let conflicts: Vec<_> = hooks
        .events()
        .into_iter()
        .filter_map(|e| match e {
            HookEvent::Conflict(_, field, value) => Some((field, value)),
            _ => None,
        })
        .collect();
    assert_eq!(conflicts, vec![("name".to_string(), Value::from("c"))]);
    assert_eq!(person.get("name").unwrap(), Value::from("merged"));
    assert_eq!(person.persisted("name").unwrap(), Value::from("c"));
}

#[test]
fn unresolved_conflicts_are_fatal() {
    let db = TestDatabase::memory();
    let person = edited_then_overwritten(&db);

    let err = db.reload(&person).unwrap_err();
    assert!(matches!(err, CoreError::UnresolvedConflict { ref field, .. } if field == "name"));
    assert!(err.is_fatal());
    assert_eq!(person.get("name").unwrap(), Value::from("a"));
}

#[test]
fn clean_fields_follow_external_writes() {
    let db = TestDatabase::memory();
    db.insert_person(1, "Ann", Some(30));
    let ann = db.instance_with_key(PERSON, 1, false).unwrap().unwrap();
    let updates = db.subscribe_to(PERSON);

    db.execute_update_query(None, "UPDATE people SET age = age + 1", &[], true)
        .unwrap();

    assert_eq!(ann.get("age").unwrap(), Value::Integer(31));
    assert_eq!(ann.state(), EntityState::Clean);
    let change = updates.try_recv().unwrap();
    assert_eq!(change.kind, ChangeKind::ExternalChange);
    assert!(change.contains(&ann));
}

#[test]
fn externally_deleted_rows_delete_live_instances() {
    let db = TestDatabase::memory();
    db.insert_person(1, "Ann", None);
    let ann = db.instance_with_key(PERSON, 1, false).unwrap().unwrap();

    db.execute_update_query(Some(PERSON), "DELETE FROM $T WHERE $PK = ?", &[1.into()], true)
        .unwrap();

    assert!(ann.is_deleted());
    assert_eq!(ann.state(), EntityState::Deleted);
}

// ============================================================================
// Notifications
// ============================================================================

#[test]
fn batches_coalesce_per_kind() {
    let db = TestDatabase::memory();
    db.insert_person(2, "Quinn", None);
    let updates = db.subscribe_to(PERSON);

    let (p, q) = db.with_batched_notifications(true, |batch| {
        let p = batch.instance_with_key(PERSON, 1, true).unwrap().unwrap();
        let q = batch.instance_with_key(PERSON, 2, false).unwrap().unwrap();
        batch.save(&p).unwrap();
        p.set("name", "Pat").unwrap();
        batch.save(&p).unwrap();
        q.set("age", 50).unwrap();
        batch.save(&q).unwrap();
        assert!(updates.try_recv().is_err());
        (p, q)
    });

    let delivered: Vec<_> = updates.try_iter().collect();
    let of_kind = |kind: ChangeKind| {
        let found: Vec<_> = delivered.iter().filter(|n| n.kind == kind).collect();
        assert_eq!(found.len(), 1, "{kind:?}");
        found[0].instances.clone()
    };

    let inserted = of_kind(ChangeKind::Insert);
    assert_eq!(inserted.len(), 1);
    assert!(inserted[0].ptr_eq(&p));

    let updated = of_kind(ChangeKind::Update);
    assert_eq!(updated.len(), 2);
    assert!(updated.iter().any(|i| i.ptr_eq(&p)));
    assert!(updated.iter().any(|i| i.ptr_eq(&q)));

    assert_eq!(of_kind(ChangeKind::AnyChange).len(), 2);
}

#[test]
fn discarded_batches_deliver_nothing() {
    let db = TestDatabase::memory();
    let updates = db.subscribe();

    db.with_batched_notifications(false, |batch| {
        let p = batch.instance_with_key(PERSON, 1, true).unwrap().unwrap();
        batch.save(&p).unwrap();
    });

    assert!(updates.try_recv().is_err());
    assert_eq!(db.number_of_instances(PERSON).unwrap(), 1);
}

#[test]
fn batches_do_not_capture_other_threads() {
    let db = TestDatabase::memory();
    let updates = db.subscribe_to(PERSON);

    db.with_batched_notifications(true, |_batch| {
        let shared = Arc::clone(&db.db);
        thread::spawn(move || {
            let other = shared.instance_with_key(PERSON, 5, true).unwrap().unwrap();
            shared.save(&other).unwrap();
        })
        .join()
        .unwrap();

        let change = updates.try_recv().unwrap();
        assert_eq!(change.kind, ChangeKind::Insert);
    });
}

// ============================================================================
// Cache
// ============================================================================

#[test]
fn ignored_fields_keep_cached_results() {
    let db = TestDatabase::memory();
    db.populate_people(3);
    let ann = db.instance_with_key(PERSON, 1, false).unwrap().unwrap();
    let query = || {
        db.cached_instances_where(PERSON, "age > ?", &[0.into()], &["last_seen"])
            .unwrap()
    };

    assert_eq!(query().len(), 3);
    let runs = db.stats().generator_runs();

    ann.set("last_seen", 1_700_000_000i64).unwrap();
    db.save(&ann).unwrap();
    assert_eq!(query().len(), 3);
    assert_eq!(db.stats().generator_runs(), runs);

    ann.set("age", 0).unwrap();
    db.save(&ann).unwrap();
    assert_eq!(query().len(), 2);
    assert_eq!(db.stats().generator_runs(), runs + 1);
}

#[test]
fn writes_to_other_models_keep_cached_results() {
    let db = TestDatabase::memory();
    db.populate_people(2);
    assert_eq!(db.cached_instances_where(PERSON, "1 = 1", &[], &[]).unwrap().len(), 2);
    let runs = db.stats().generator_runs();

    let pet = db.new_instance(PET).unwrap();
    pet.set("name", "Rex").unwrap();
    assert_eq!(db.save(&pet).unwrap(), SaveResult::Succeeded);

    assert_eq!(db.cached_instances_where(PERSON, "1 = 1", &[], &[]).unwrap().len(), 2);
    assert_eq!(db.stats().generator_runs(), runs);
}

#[test]
fn concurrent_misses_generate_once() {
    let db = TestDatabase::memory();
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let db = Arc::clone(&db.db);
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                db.cached_object("report", &[PERSON], &[], || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(50));
                    Ok(String::from("expensive"))
                })
                .unwrap()
                .unwrap()
            })
        })
        .collect();

    let values: Vec<Arc<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&values[0], &values[1]));
    assert_eq!(values[0].as_str(), "expensive");
}
