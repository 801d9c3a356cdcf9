mod common;

use std::sync::Arc;
use trackdb_core::{
    Article, Author, Comment, ConstraintViolation, DeletePolicy, EntityKind, EntityState, Field,
    Model, OrmError, Predicate, Query, Relation, Session, Tag, ValidationError,
};

fn load_ownership(session: &mut Session) -> trackdb_core::EntityRef<Article> {
    Query::<Article>::new()
        .filter(Field::new("title").equals("Rust ownership"))
        .include(Relation::ArticleComments)
        .include(Relation::ArticleTags)
        .single(session)
        .unwrap()
}

#[test]
fn restrict_blocks_deleting_an_author_with_articles() {
    let (backend, seed, mut session) = common::seeded();

    let alice = session.find::<Author>(seed.alice).unwrap().unwrap();
    session.remove(&alice).unwrap();

    let err = session.save().unwrap_err();
    match err {
        OrmError::ConstraintViolation(ConstraintViolation::RestrictedDelete {
            owner,
            owner_id,
            relation,
            dependents,
        }) => {
            assert_eq!(owner, EntityKind::Author);
            assert_eq!(owner_id, seed.alice);
            assert_eq!(relation, Relation::AuthorArticles);
            assert_eq!(dependents, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.state_of(&alice), EntityState::Deleted);

    let mut fresh = common::session(&backend);
    assert_eq!(Query::<Author>::new().count(&mut fresh).unwrap(), 2);
    assert_eq!(Query::<Article>::new().count(&mut fresh).unwrap(), 3);
}

#[test]
fn cascade_removes_comments_and_tag_links_but_keeps_tags() {
    let (backend, seed, mut session) = common::seeded();

    let article = session.find::<Article>(seed.ownership).unwrap().unwrap();
    session.remove(&article).unwrap();
    let summary = session.save().unwrap();
    assert_eq!(summary.deleted, 3);
    assert_eq!(session.state_of(&article), EntityState::Detached);

    let mut fresh = common::session(&backend);
    assert_eq!(Query::<Comment>::new().count(&mut fresh).unwrap(), 0);
    assert_eq!(Query::<Article>::new().count(&mut fresh).unwrap(), 2);
    assert_eq!(Query::<Tag>::new().count(&mut fresh).unwrap(), 2);
    assert_eq!(
        Query::<Tag>::new()
            .filter(Predicate::any(Relation::TagArticles))
            .count(&mut fresh)
            .unwrap(),
        0
    );
}

#[test]
fn restrict_is_satisfied_when_dependents_go_too() {
    let (backend, seed, mut session) = common::seeded();

    let bob = session.find::<Author>(seed.bob).unwrap().unwrap();
    let articles = session.load(&bob, trackdb_core::nav::AuthorArticles).unwrap();
    assert_eq!(articles.len(), 1);

    session.remove(&articles[0]).unwrap();
    session.remove(&bob).unwrap();
    let summary = session.save().unwrap();
    assert_eq!(summary.deleted, 2);

    let mut fresh = common::session(&backend);
    assert!(fresh.find::<Author>(seed.bob).unwrap().is_none());
    assert!(fresh.find::<Article>(seed.sql_basics).unwrap().is_none());
}

#[test]
fn cascading_model_deletes_the_whole_subtree() {
    let (backend, seed, _session) = common::seeded();
    let model = Model::builder()
        .on_delete(Relation::AuthorArticles, DeletePolicy::Cascade)
        .on_delete(Relation::ArticleComments, DeletePolicy::Cascade)
        .build()
        .unwrap();
    let mut session = Session::new(Arc::clone(&backend), Arc::new(model));

    let alice = session.find::<Author>(seed.alice).unwrap().unwrap();
    session.remove(&alice).unwrap();
    let summary = session.save().unwrap();
    assert_eq!(summary.deleted, 5);

    let mut fresh = common::session(&backend);
    assert_eq!(Query::<Article>::new().count(&mut fresh).unwrap(), 1);
    assert_eq!(Query::<Comment>::new().count(&mut fresh).unwrap(), 0);
}

#[test]
fn removing_a_comment_from_its_article_deletes_it() {
    let (backend, _seed, mut session) = common::seeded();

    let article = load_ownership(&mut session);
    let first = article.borrow().comments().unwrap()[0].clone();
    let removed = article.borrow_mut().remove_comment(first.id()).unwrap();
    assert!(removed.is_some());
    assert_eq!(session.state_of(&first), EntityState::Deleted);

    let summary = session.save().unwrap();
    assert_eq!(summary.deleted, 1);
    assert_eq!(session.state_of(&first), EntityState::Detached);

    let mut fresh = common::session(&backend);
    assert_eq!(Query::<Comment>::new().count(&mut fresh).unwrap(), 1);
}

#[test]
fn comment_added_then_removed_is_never_inserted() {
    let (_backend, _seed, mut session) = common::seeded();

    let article = load_ownership(&mut session);
    let draft = article.borrow_mut().add_comment("Draft").unwrap();
    assert_eq!(session.state_of(&draft), EntityState::Added);
    article.borrow_mut().remove_comment(draft.id()).unwrap();
    assert_eq!(session.state_of(&draft), EntityState::Detached);

    assert!(!session.has_changes());
    let summary = session.save().unwrap();
    assert_eq!(summary.inserted, 0);
    assert_eq!(Query::<Comment>::new().count(&mut session).unwrap(), 2);
}

#[test]
fn duplicate_tag_name_fails_and_keeps_state() {
    let (_backend, _seed, mut session) = common::seeded();

    let shouting = Tag::create("RUST").unwrap();
    session.add(&shouting).unwrap();

    let err = session.save().unwrap_err();
    assert!(matches!(
        err,
        OrmError::ConstraintViolation(ConstraintViolation::Unique(_))
    ));
    assert_eq!(session.state_of(&shouting), EntityState::Added);
    assert_eq!(Query::<Tag>::new().count(&mut session).unwrap(), 2);

    shouting.borrow_mut().rename("systems").unwrap();
    assert_eq!(session.save().unwrap().inserted, 1);
}

#[test]
fn tag_associations_follow_the_article_collection() {
    let (backend, seed, mut session) = common::seeded();

    let article = load_ownership(&mut session);
    assert!(article.borrow_mut().remove_tag(seed.rust_tag).unwrap());
    let summary = session.save().unwrap();
    assert_eq!(summary.unlinked, 1);
    assert_eq!(summary.deleted, 0);

    let sql = Query::<Article>::new()
        .filter(Field::new("id").equals(seed.sql_basics))
        .include(Relation::ArticleTags)
        .single(&mut session)
        .unwrap();
    let rust = session.find::<Tag>(seed.rust_tag).unwrap().unwrap();
    let sqlite = Tag::create("  sqlite   engines ").unwrap();
    assert!(sql.borrow_mut().add_tag(&rust).unwrap());
    assert!(sql.borrow_mut().add_tag(&sqlite).unwrap());
    assert!(!sql.borrow_mut().add_tag(&rust).unwrap());

    let summary = session.save().unwrap();
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.linked, 2);

    let mut fresh = common::session(&backend);
    let reloaded = fresh.find::<Article>(seed.sql_basics).unwrap().unwrap();
    let mut names = fresh
        .load(&reloaded, trackdb_core::nav::ArticleTags)
        .unwrap()
        .iter()
        .map(|tag| tag.borrow().name().to_string())
        .collect::<Vec<_>>();
    names.sort();
    assert_eq!(names, vec!["rust", "sqlite engines"]);
    assert_eq!(Query::<Tag>::new().count(&mut fresh).unwrap(), 3);
}

#[test]
fn pending_comment_under_a_deleted_article_is_dropped() {
    let (backend, _seed, mut session) = common::seeded();

    let article = load_ownership(&mut session);
    article.borrow_mut().add_comment("Too late").unwrap();
    session.remove(&article).unwrap();

    let summary = session.save().unwrap();
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.deleted, 3);

    let mut fresh = common::session(&backend);
    assert_eq!(Query::<Comment>::new().count(&mut fresh).unwrap(), 0);
}

#[test]
fn models_require_a_policy_for_every_ownership() {
    let err = Model::builder()
        .on_delete(Relation::ArticleComments, DeletePolicy::Cascade)
        .build()
        .unwrap_err();
    assert_eq!(
        err,
        ValidationError::MissingDeletePolicy(Relation::AuthorArticles)
    );

    let err = Model::builder()
        .on_delete(Relation::AuthorArticles, DeletePolicy::Restrict)
        .on_delete(Relation::ArticleComments, DeletePolicy::Cascade)
        .on_delete(Relation::ArticleTags, DeletePolicy::Cascade)
        .build()
        .unwrap_err();
    assert_eq!(err, ValidationError::NotAnOwnership(Relation::ArticleTags));

    assert_eq!(
        Model::builder()
            .on_delete(Relation::AuthorArticles, DeletePolicy::Restrict)
            .on_delete(Relation::ArticleComments, DeletePolicy::Cascade)
            .build()
            .unwrap(),
        Model::blog()
    );
}
