mod common;

use std::sync::Arc;
use std::thread;
use trackdb_core::{
    Author, CancellationToken, EntityState, Field, OrmError, Query, SessionOptions, StoreError,
    Tag,
};

#[test]
fn sessions_on_separate_threads_share_one_backend() {
    let backend = common::backend();
    common::seed(&backend);

    let workers = (0..4)
        .map(|index| {
            let backend = Arc::clone(&backend);
            thread::spawn(move || {
                let mut session = common::session(&backend);
                let tag = Tag::create(format!("topic-{index}")).unwrap();
                session.add(&tag).unwrap();
                session.save().unwrap();

                Query::<Tag>::new()
                    .filter(Field::new("name").starts_with("topic-"))
                    .count(&mut session)
                    .unwrap()
            })
        })
        .collect::<Vec<_>>();

    for worker in workers {
        let seen = worker.join().unwrap();
        assert!((1..=4).contains(&seen));
    }

    let mut session = common::session(&backend);
    assert_eq!(Query::<Tag>::new().count(&mut session).unwrap(), 6);
}

#[test]
fn cancelled_session_skips_storage_until_reset() {
    let backend = common::backend();
    common::seed(&backend);

    let token = CancellationToken::new();
    let mut session = common::session_with(
        &backend,
        SessionOptions {
            cancellation: token.clone(),
            ..SessionOptions::default()
        },
    );

    let canceller = {
        let token = token.clone();
        thread::spawn(move || token.cancel())
    };
    canceller.join().unwrap();

    let err = Query::<Author>::new().list(&mut session).unwrap_err();
    assert!(matches!(err, OrmError::Storage(StoreError::Cancelled)));
    assert_eq!(session.stats().round_trips, 0);

    let dave = Author::create("Dave").unwrap();
    session.add(&dave).unwrap();
    let err = session.save().unwrap_err();
    assert!(err.is_storage());
    assert_eq!(session.state_of(&dave), EntityState::Added);
    assert!(session.debug_info().cancelled);

    token.reset();
    assert_eq!(session.save().unwrap().inserted, 1);
    assert_eq!(session.state_of(&dave), EntityState::Unchanged);
    assert_eq!(Query::<Author>::new().count(&mut session).unwrap(), 3);
}
