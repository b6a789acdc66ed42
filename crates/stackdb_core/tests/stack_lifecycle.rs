//! Integration tests for stack construction, metadata, reset and confinement.

use stackdb_core::{
    default_stack, ContextKind, CoreError, Entity, FetchRequest, FindResult, Predicate, Stack, StoreConfiguration,
    Value,
};
use stackdb_testkit::{person, schema_json, seed, write_schema, TestStack, PEOPLE_SCHEMA, TEST_DB_NAME};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use tempfile::TempDir;

fn counting_stack(created: &Arc<AtomicUsize>) -> TestStack {
    let created = Arc::clone(created);
    TestStack::with_config(move |config| {
        config.on_store_created(move |_| {
            created.fetch_add(1, Ordering::SeqCst);
        })
    })
}

#[test]
fn later_stacks_reuse_the_store() {
    let created = Arc::new(AtomicUsize::new(0));
    let first = counting_stack(&created);
    assert_eq!(created.load(Ordering::SeqCst), 1);

    let ctx = first.background_context().unwrap();
    seed(&ctx, &[person(1, "Ada")]);

    let second = first.another();
    let third = first.another();
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&second.coordinator().unwrap(), &third.coordinator().unwrap()));

    let n = second
        .background_context()
        .unwrap()
        .perform_and_wait(|s| s.count("Person", &Predicate::All))
        .unwrap();
    assert_eq!(n, 1);
}

#[test]
fn reopening_a_closed_store_does_not_recreate_it() {
    let created = Arc::new(AtomicUsize::new(0));
    let stack = counting_stack(&created);
    stack.set_meta_value("1.0", "schema_version").unwrap();

    let stack = stack.reopen();
    assert!(stack.is_available());
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(
        stack.meta_value_for_key("schema_version").unwrap(),
        Some(Value::from("1.0"))
    );
}

#[test]
fn metadata_last_write_wins_and_survives_reopen() {
    let stack = TestStack::new();
    let meta = stack.metadata();
    meta.set_meta_value(1, "generation").unwrap();
    meta.set_meta_value(2, "generation").unwrap();
    meta.set_meta_value("etag-9", "etag").unwrap();
    assert_eq!(meta.meta_value_for_key("generation").unwrap(), Some(Value::Integer(2)));
    drop(meta);

    let stack = stack.reopen();
    assert_eq!(stack.meta_value_for_key("generation").unwrap(), Some(Value::Integer(2)));
    assert_eq!(
        stack.metadata().meta_keys().unwrap(),
        vec!["etag".to_string(), "generation".to_string()]
    );
}

#[test]
fn reset_empties_the_store() {
    let stack = TestStack::new();
    let ctx = stack.background_context().unwrap();
    seed(&ctx, &[person(1, "Ada"), person(2, "Grace")]);
    stack.set_meta_value("v1", "schema").unwrap();
    let held = ctx
        .perform_and_wait(|s| Ok(s.fetch(&FetchRequest::new("Person"))?.len()))
        .unwrap();
    assert_eq!(held, 2);

    stack.reset_stack().unwrap();

    assert_eq!(stack.meta_value_for_key("schema").unwrap(), None);
    let (tx, rx) = mpsc::channel();
    stack
        .find(Some(&ctx), FetchRequest::new("Person"), move |found| {
            tx.send(found.map(|f| f.len()).map_err(|e| e.to_string())).unwrap();
        })
        .unwrap();
    assert_eq!(rx.recv().unwrap(), Ok(0));
    assert_eq!(ctx.perform_and_wait(|s| Ok(s.registered_count())).unwrap(), 0);
    assert!(stack.path().exists());
}

#[test]
fn failed_open_leaves_every_context_unavailable() {
    let dir = TempDir::new().unwrap();
    let failures = Arc::new(Mutex::new(Vec::new()));
    let config = {
        let failures = Arc::clone(&failures);
        StoreConfiguration::new([dir.path().join("no-such-model.json")], TEST_DB_NAME)
            .base_dir(dir.path())
            .on_open_failed(move |path| failures.lock().unwrap().push(path.to_path_buf()))
    };
    let stack = Stack::new(config);

    assert!(!stack.is_available());
    assert_eq!(*failures.lock().unwrap(), vec![dir.path().join(TEST_DB_NAME)]);

    for ctx in [
        stack.main_context(),
        stack.background_context().unwrap(),
        stack.sandbox_context().unwrap(),
    ] {
        let err = ctx.perform_and_wait(|s| s.count("Person", &Predicate::All)).unwrap_err();
        assert!(err.is_store_unavailable(), "{err}");
    }
    let err = Entity::named("Person")
        .insert_object_with_dictionary(&stack.main_context(), person(1, "Ada"))
        .unwrap_err();
    assert!(err.is_store_unavailable());
}

#[test]
fn reset_recovers_after_the_model_appears() {
    let dir = TempDir::new().unwrap();
    let model = dir.path().join("people.json");
    let stack = Stack::new(StoreConfiguration::new([model.clone()], TEST_DB_NAME).base_dir(dir.path()));
    assert!(!stack.is_available());

    write_schema(dir.path(), "people.json", PEOPLE_SCHEMA);
    stack.reset_stack().unwrap();
    assert!(stack.is_available());
    assert!(stack.open_error().is_none());
}

#[test]
fn failed_reset_reports_reset_failed() {
    let dir = TempDir::new().unwrap();
    let stack = Stack::new(
        StoreConfiguration::new([dir.path().join("missing.json")], TEST_DB_NAME).base_dir(dir.path()),
    );
    let err = stack.reset_stack().unwrap_err();
    assert!(matches!(err, CoreError::ResetFailed { .. }), "{err}");
    assert!(!stack.is_available());
}

#[test]
fn failed_reset_keeps_the_existing_store() {
    let dir = TempDir::new().unwrap();
    let model = write_schema(dir.path(), "people.json", PEOPLE_SCHEMA);
    let config = StoreConfiguration::new([model], TEST_DB_NAME).base_dir(dir.path());
    let stack = Stack::new(config.clone());
    stack.set_meta_value("etag-1", "etag").unwrap();
    drop(stack);

    let misnamed = Stack::new(
        StoreConfiguration::new([dir.path().join("typo.json")], TEST_DB_NAME).base_dir(dir.path()),
    );
    let err = misnamed.reset_stack().unwrap_err();
    assert!(matches!(err, CoreError::ResetFailed { .. }), "{err}");
    assert!(dir.path().join(TEST_DB_NAME).exists());
    drop(misnamed);

    let reopened = Stack::new(config);
    assert!(reopened.is_available());
    assert_eq!(reopened.meta_value_for_key("etag").unwrap(), Some(Value::from("etag-1")));
}

#[test]
fn reset_never_replaces_a_store_open_with_another_schema() {
    let stack = TestStack::new();
    stack.set_meta_value(1, "generation").unwrap();
    let notes = write_schema(
        stack.dir(),
        "notes.json",
        &schema_json("1", &[("Note", &[("title", "text", true)])]),
    );
    let other = Stack::new(StoreConfiguration::new([notes], TEST_DB_NAME).base_dir(stack.dir()));
    assert!(!other.is_available());

    match other.reset_stack().unwrap_err() {
        CoreError::ResetFailed { source, .. } => {
            assert!(matches!(*source, CoreError::InvalidOperation { .. }), "{source}");
        }
        err => panic!("unexpected error: {err}"),
    }
    stack.set_meta_value(2, "generation").unwrap();
    drop(other);

    let stack = stack.reopen();
    assert_eq!(stack.meta_value_for_key("generation").unwrap(), Some(Value::Integer(2)));
}

#[test]
fn foreign_thread_cannot_mutate_through_main_context() {
    let stack = TestStack::new();
    let main = stack.main_context();
    assert_eq!(main.kind(), ContextKind::Main);

    let remote = main.clone();
    let err = thread::spawn(move || {
        Entity::named("Person")
            .insert_object_with_dictionary(&remote, person(1, "Mallory"))
            .unwrap_err()
    })
    .join()
    .unwrap();

    assert!(matches!(err, CoreError::ConfinementViolation { .. }), "{err}");
    assert_eq!(stack.coordinator().unwrap().record_count(), 0);
    assert!(!main.session().unwrap().has_changes());
}

#[test]
fn foreign_thread_count_is_rejected_without_callback() {
    let stack = TestStack::new();
    let main = stack.main_context();
    let called = Arc::new(AtomicUsize::new(0));

    let remote = main.clone();
    let hits = Arc::clone(&called);
    let result = thread::spawn(move || {
        stackdb_core::count(&remote, "Person", Predicate::All, move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    })
    .join()
    .unwrap();

    assert!(matches!(result, Err(CoreError::ConfinementViolation { .. })));
    assert_eq!(called.load(Ordering::SeqCst), 0);
}

#[test]
fn sandbox_carries_user_info_and_never_saves() {
    let stack = TestStack::new();
    let sandbox = stack.sandbox_context().unwrap();

    let outcome = sandbox
        .perform_and_wait(|s| {
            s.set_user_info(String::from("draft-42"))?;
            s.insert_with_dictionary("Person", &person(1, "Draft"))?;
            let saved = s.save();
            Ok((s.user_info::<String>(), saved.is_err(), s.count("Person", &Predicate::All)?))
        })
        .unwrap();

    assert_eq!(outcome, (Some("draft-42".to_string()), true, 1));
    assert_eq!(stack.coordinator().unwrap().record_count(), 0);

    let err = stack
        .main_context()
        .perform_and_wait(|s| s.set_user_info(1_u8))
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidOperation { .. }));
}

#[test]
fn unsaved_changes_stay_in_their_context() {
    let stack = TestStack::new();
    let a = stack.background_context().unwrap();
    let b = stack.background_context().unwrap();

    a.perform_and_wait(|s| s.insert_with_dictionary("Person", &person(1, "Ada")).map(drop))
        .unwrap();
    assert_eq!(a.perform_and_wait(|s| s.count("Person", &Predicate::All)).unwrap(), 1);
    assert_eq!(b.perform_and_wait(|s| s.count("Person", &Predicate::All)).unwrap(), 0);

    a.perform_and_wait(|s| s.save()).unwrap();
    let found = b
        .perform_and_wait(|s| s.find(&FetchRequest::new("Person").dictionaries()).map(FindResult::into_dictionaries))
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("name"), Some(&Value::from("Ada")));
}

#[test]
fn default_stack_is_created_on_first_use() {
    let dir = TempDir::new().unwrap();
    let model = write_schema(dir.path(), "people.json", PEOPLE_SCHEMA);
    default_stack::clear();
    default_stack::settings::set_db_base_dir(dir.path());

    let first = Stack::with_model_filenames([model.clone()], "default.sdb");
    let second = Stack::with_model_filenames([model], "other.sdb");
    default_stack::settings::restore_defaults();

    assert!(default_stack::get().unwrap().same_stack(&first));
    assert!(!default_stack::get().unwrap().same_stack(&second));
    assert_eq!(first.store_path(), dir.path().join("default.sdb"));

    default_stack::set_meta_value(true, "seeded").unwrap();
    assert_eq!(first.meta_value_for_key("seeded").unwrap(), Some(Value::Bool(true)));
    default_stack::reset_stack().unwrap();
    assert_eq!(default_stack::meta_value_for_key("seeded").unwrap(), None);

    assert!(default_stack::clear().is_some());
    assert!(matches!(default_stack::main_context(), Err(CoreError::NoDefaultStack)));
}
