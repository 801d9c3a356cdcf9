mod common;

use trackdb_core::{Author, Field, OrmError, Predicate, Query, Relation, ValidationError};

#[test]
fn same_row_materializes_as_the_same_instance() {
    let (_backend, seed, mut session) = common::seeded();

    let first = Query::<Author>::new()
        .filter(Field::new("name").equals("Alice"))
        .single(&mut session)
        .unwrap();
    let second = Query::<Author>::new()
        .order_by(Field::new("name"))
        .first(&mut session)
        .unwrap();

    assert!(first.ptr_eq(&second));
    assert_eq!(first.id(), seed.alice);
    assert_eq!(session.identity_map().len(), 1);
}

#[test]
fn get_never_touches_storage() {
    let (_backend, seed, mut session) = common::seeded();

    assert!(session.get::<Author>(seed.alice).is_none());
    session.find::<Author>(seed.alice).unwrap().unwrap();
    session.reset_stats();

    let cached = session.get::<Author>(seed.alice).unwrap();
    assert_eq!(cached.borrow().name(), "Alice");
    assert_eq!(session.stats().round_trips, 0);
}

#[test]
fn find_queries_once_then_serves_from_the_map() {
    let (_backend, seed, mut session) = common::seeded();

    let loaded = session.find::<Author>(seed.bob).unwrap().unwrap();
    assert_eq!(session.stats().round_trips, 1);

    let again = session.find::<Author>(seed.bob).unwrap().unwrap();
    assert!(loaded.ptr_eq(&again));
    assert_eq!(session.stats().round_trips, 1);

    let missing = session.find::<Author>(uuid::Uuid::new_v4()).unwrap();
    assert!(missing.is_none());
    assert_eq!(session.stats().round_trips, 2);
}

#[test]
fn second_instance_with_tracked_identity_is_rejected() {
    let (_backend, seed, mut session) = common::seeded();

    let tracked = session.find::<Author>(seed.alice).unwrap().unwrap();
    let detached = Query::<Author>::new()
        .filter(Field::new("id").equals(seed.alice))
        .as_no_tracking()
        .single(&mut session)
        .unwrap();
    assert!(!tracked.ptr_eq(&detached));

    let err = session.attach(&detached).unwrap_err();
    assert!(matches!(
        err,
        OrmError::Validation(ValidationError::IdentityConflict { id, .. }) if id == seed.alice
    ));
    let err = session.add(&detached).unwrap_err();
    assert!(err.is_validation());
    assert!(session.get::<Author>(seed.alice).unwrap().ptr_eq(&tracked));
}

#[test]
fn clear_forgets_instances_and_resets_navigations() {
    let (_backend, seed, mut session) = common::seeded();

    let alice = session.find::<Author>(seed.alice).unwrap().unwrap();
    let articles = session
        .load(&alice, trackdb_core::nav::AuthorArticles)
        .unwrap();
    assert_eq!(articles.len(), 2);

    session.clear();
    assert!(session.identity_map().is_empty());
    assert!(session.get::<Author>(seed.alice).is_none());
    assert!(alice.borrow().articles().is_none());

    let reloaded = session.find::<Author>(seed.alice).unwrap().unwrap();
    assert!(!reloaded.ptr_eq(&alice));
}

#[test]
fn clear_and_drop_tolerate_borrowed_instances() {
    let (_backend, seed, mut session) = common::seeded();

    let alice = session.find::<Author>(seed.alice).unwrap().unwrap();
    session
        .load(&alice, trackdb_core::nav::AuthorArticles)
        .unwrap();

    let view = alice.borrow();
    session.clear();
    assert!(session.identity_map().is_empty());
    assert_eq!(view.articles().unwrap().len(), 2);
    drop(view);

    let bob = session.find::<Author>(seed.bob).unwrap().unwrap();
    let view = bob.borrow();
    drop(session);
    assert_eq!(view.name(), "Bob");
}

#[test]
fn requery_keeps_unsaved_edits() {
    let (_backend, seed, mut session) = common::seeded();

    let alice = session.find::<Author>(seed.alice).unwrap().unwrap();
    alice.borrow_mut().rename("Alicia").unwrap();

    let requeried = Query::<Author>::new()
        .filter(Predicate::any(Relation::AuthorArticles))
        .order_by(Field::new("name"))
        .list(&mut session)
        .unwrap();

    let alice_again = requeried
        .iter()
        .find(|author| author.id() == seed.alice)
        .unwrap();
    assert!(alice_again.ptr_eq(&alice));
    assert_eq!(alice_again.borrow().name(), "Alicia");
}
